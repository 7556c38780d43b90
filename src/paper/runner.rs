//! Background trading loop
//!
//! [`TradingLoop::start`] moves the [`Trader`] into a tokio task. While the task
//! runs it is the only owner; the foreground talks to it through
//! [`TradingHandle`], which sends [`Command`]s and awaits `oneshot` replies.
//! [`TradingHandle::stop`] hands the trader back.

use super::trader::{TradeRequest, Trader, TraderStatus};
use crate::error::{BotError, Result};
use crate::types::{Trade, TradingMode};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed cycle
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(10);

const COMMAND_BUFFER: usize = 32;

/// Requests served by the running loop between cycles
#[derive(Debug)]
pub enum Command {
    Status(oneshot::Sender<TraderStatus>),
    ExecuteTrade {
        request: TradeRequest,
        reply: oneshot::Sender<Result<Option<Trade>>>,
    },
    SetAutoExecute {
        enabled: bool,
        min_confidence: f64,
        refresh_secs: u64,
        reply: oneshot::Sender<()>,
    },
    SetCredentials {
        key: String,
        secret: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SwitchMode {
        mode: TradingMode,
        reply: oneshot::Sender<Result<()>>,
    },
    Export {
        filename: Option<PathBuf>,
        reply: oneshot::Sender<Option<PathBuf>>,
    },
}

pub struct TradingLoop;

impl TradingLoop {
    /// Spawn the loop. Cycles run back to back with `interval` between them.
    pub fn start(mut trader: Trader, interval: Duration) -> TradingHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join_timeout = Duration::from_secs(trader.settings().join_timeout_secs);

        trader.set_running(true);
        info!("Starting trading loop with {}s interval", interval.as_secs());
        let task = tokio::spawn(run(trader, interval, command_rx, shutdown_rx));

        TradingHandle {
            commands: command_tx,
            shutdown: shutdown_tx,
            task,
            join_timeout,
        }
    }
}

async fn run(
    mut trader: Trader,
    interval: Duration,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> Trader {
    trader.save_state().await;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Runs to completion; the cycle checks shutdown between orders
        let outcome = AssertUnwindSafe(trader.run_cycle(&shutdown))
            .catch_unwind()
            .await;

        let pause = match outcome {
            Ok(Ok(trades)) => {
                debug!("Trading cycle complete, {} trades executed", trades.len());
                interval
            }
            Ok(Err(e)) => {
                error!("Error in trading loop: {}", e);
                ERROR_COOLDOWN
            }
            Err(_) => {
                error!("Trading cycle panicked");
                ERROR_COOLDOWN
            }
        };

        if !wait(&mut trader, pause, &mut commands, &mut shutdown).await {
            break;
        }
    }

    info!("Trading loop stopped");
    trader
}

/// Drive `future` unless shutdown is signalled first. Returns `None` on shutdown.
///
/// Only for work that is safe to drop halfway (lookups, fetches).
pub(super) async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    future: F,
) -> Option<F::Output> {
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        Ok(()) = shutdown.changed() => None,
        output = future => Some(output),
    }
}

/// Sleep for `pause` while serving commands. Returns `false` on shutdown.
async fn wait(
    trader: &mut Trader,
    pause: Duration,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(pause);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return false,
            Some(command) = commands.recv() => {
                if !handle(trader, command, shutdown).await {
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}

/// Serve one command. Returns `false` when shutdown interrupted it.
///
/// Status lookups give way to shutdown; commands that may place an order or
/// write configuration finish first.
async fn handle(trader: &mut Trader, command: Command, shutdown: &mut watch::Receiver<bool>) -> bool {
    // A dropped reply receiver only means the caller gave up waiting
    match command {
        Command::Status(reply) => match until_shutdown(shutdown, trader.status()).await {
            Some(status) => {
                let _ = reply.send(status);
            }
            None => return false,
        },
        Command::ExecuteTrade { request, reply } => {
            let _ = reply.send(trader.execute_trade(request).await);
        }
        Command::SetAutoExecute {
            enabled,
            min_confidence,
            refresh_secs,
            reply,
        } => {
            trader.set_auto_execute(enabled, min_confidence, refresh_secs).await;
            let _ = reply.send(());
        }
        Command::SetCredentials { key, secret, reply } => {
            let _ = reply.send(trader.set_credentials(&key, &secret).await);
        }
        Command::SwitchMode { mode, reply } => {
            let _ = reply.send(trader.switch_mode(mode).await);
        }
        Command::Export { filename, reply } => {
            let _ = reply.send(trader.export(filename.as_deref()).await);
        }
    }
    true
}

/// Foreground side of a running [`TradingLoop`]
pub struct TradingHandle {
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Trader>,
    join_timeout: Duration,
}

impl TradingHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| BotError::TraderStopped)?;
        response.await.map_err(|_| BotError::TraderStopped)
    }

    pub async fn status(&self) -> Result<TraderStatus> {
        self.request(Command::Status).await
    }

    pub async fn execute_trade(&self, request: TradeRequest) -> Result<Option<Trade>> {
        self.request(|reply| Command::ExecuteTrade { request, reply }).await?
    }

    pub async fn set_auto_execute(&self, enabled: bool, min_confidence: f64, refresh_secs: u64) -> Result<()> {
        self.request(|reply| Command::SetAutoExecute {
            enabled,
            min_confidence,
            refresh_secs,
            reply,
        })
        .await
    }

    pub async fn set_credentials(&self, key: &str, secret: &str) -> Result<()> {
        let (key, secret) = (key.to_string(), secret.to_string());
        self.request(|reply| Command::SetCredentials { key, secret, reply })
            .await?
    }

    pub async fn switch_mode(&self, mode: TradingMode) -> Result<()> {
        self.request(|reply| Command::SwitchMode { mode, reply }).await?
    }

    pub async fn export(&self, filename: Option<PathBuf>) -> Result<Option<PathBuf>> {
        self.request(|reply| Command::Export { filename, reply }).await
    }

    /// The task has exited (it only does so on shutdown or a crash)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and take the trader back.
    ///
    /// Market-data and status lookups are cut short; an order already sent to
    /// the exchange is recorded before the loop exits. Waits up to the
    /// configured join timeout, then aborts the task and returns `None`. On a
    /// clean stop the final state is saved and a results export is written.
    pub async fn stop(self) -> Option<Trader> {
        let TradingHandle {
            shutdown,
            mut task,
            join_timeout,
            ..
        } = self;
        let _ = shutdown.send(true);

        let mut trader = match tokio::time::timeout(join_timeout, &mut task).await {
            Ok(Ok(trader)) => trader,
            Ok(Err(e)) => {
                error!("Trading task failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Trading loop did not stop within {}s, aborting",
                    join_timeout.as_secs()
                );
                task.abort();
                return None;
            }
        };

        trader.set_running(false);
        trader.save_state().await;
        trader.export(None).await;
        info!("Trading bot stopped");
        Some(trader)
    }
}
