//! Paper/Live Crypto Trading Bot
//!
//! Command-line front end for the trading engine.

use clap::{Parser, Subcommand};
use paper_trader::{
    client::{BinanceClient, BinanceConnector},
    config::AppSettings,
    paper::{TradeRequest, Trader, TradingHandle, TradingLoop},
    types::{Side, TradingMode},
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "paper-trader")]
#[command(about = "Paper and live crypto trading bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop until stopped
    Start {
        /// Seconds between trading cycles
        #[arg(short, long, default_value = "300")]
        interval: u64,
    },
    /// Mark the bot stopped and export results
    Stop,
    /// Show portfolio and performance
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Switch trading mode
    Switch {
        /// paper or live
        mode: TradingMode,
    },
    /// Reset the account to the initial balance
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Export trading results
    Export {
        /// Output file (default: timestamped file in the export directory)
        #[arg(short, long)]
        filename: Option<PathBuf>,
    },
    /// Set exchange API credentials
    Api { key: String, secret: String },
    /// Configure auto-execution of suggested trades
    AutoExecute {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
        /// Minimum confidence (0.0 - 1.0)
        #[arg(long)]
        confidence: Option<f64>,
        /// Seconds between feed checks
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Execute a manual trade
    ExecuteTrade {
        #[arg(long)]
        symbol: String,
        /// BUY or SELL
        #[arg(long)]
        side: Side,
        /// Defaults to the last seen or current market price
        #[arg(long)]
        price: Option<Decimal>,
        /// Defaults to 5% of balance (BUY) or half the position (SELL)
        #[arg(long)]
        quantity: Option<Decimal>,
        #[arg(long, default_value = "0.75")]
        confidence: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let settings = AppSettings::load(&cli.config)?;
    let trader = build_trader(settings).await?;

    match cli.command {
        Commands::Start { interval } => run_bot(trader, interval).await,
        Commands::Stop => stop_bot(trader).await,
        Commands::Status { json } => show_status(trader, json).await,
        Commands::Switch { mode } => switch_mode(trader, mode).await,
        Commands::Reset { yes } => reset_account(trader, yes).await,
        Commands::Export { filename } => export_results(trader, filename).await,
        Commands::Api { key, secret } => set_api_keys(trader, &key, &secret).await,
        Commands::AutoExecute {
            enabled,
            confidence,
            interval,
        } => auto_execute(trader, enabled, confidence, interval).await,
        Commands::ExecuteTrade {
            symbol,
            side,
            price,
            quantity,
            confidence,
        } => {
            let mut request = TradeRequest::new(symbol, side).with_confidence(confidence);
            request.price = price;
            request.quantity = quantity;
            execute_trade(trader, request).await
        }
    }
}

async fn build_trader(settings: AppSettings) -> anyhow::Result<Trader> {
    let market = Arc::new(BinanceClient::new(&settings.exchange_url)?);
    let connector = Arc::new(BinanceConnector::new(settings.exchange_url.clone()));
    Ok(Trader::new(settings, market, connector).await?)
}

async fn run_bot(trader: Trader, interval: u64) -> anyhow::Result<()> {
    tracing::info!("Starting trading bot in {} mode", trader.mode());
    let handle = TradingLoop::start(trader, Duration::from_secs(interval.max(1)));

    println!("Trading bot started. Commands: status, export, stop (Ctrl-C also stops).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !console_command(&handle, line.trim()).await {
                        break;
                    }
                }
                // Detached from a terminal: keep running until Ctrl-C
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Error reading console input: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    match handle.stop().await {
        Some(trader) => println!("Trading bot stopped. Final balance: {:.2}", trader.state().balance),
        None => println!("Trading bot did not stop cleanly, state may be stale"),
    }
    Ok(())
}

/// Returns `false` when the console asks to stop
async fn console_command(handle: &TradingHandle, command: &str) -> bool {
    let result = match command {
        "" => Ok(()),
        "stop" | "quit" | "exit" => return false,
        "status" => handle.status().await.map(|status| println!("{}", status)),
        "export" => handle.export(None).await.map(|path| match path {
            Some(path) => println!("Results exported to {}", path.display()),
            None => println!("Export failed"),
        }),
        other => {
            println!("Unknown command: {}", other);
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {}", e);
        return !handle.is_finished();
    }
    true
}

async fn stop_bot(mut trader: Trader) -> anyhow::Result<()> {
    trader.update_equity_history().await;
    trader.save_state().await;
    if let Some(path) = trader.export(None).await {
        println!("Results exported to {}", path.display());
    }
    println!("Trading bot stopped");
    Ok(())
}

async fn show_status(mut trader: Trader, json: bool) -> anyhow::Result<()> {
    let status = trader.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", status);
    }
    Ok(())
}

async fn switch_mode(mut trader: Trader, mode: TradingMode) -> anyhow::Result<()> {
    trader.switch_mode(mode).await?;
    println!("Switched to {} trading mode", mode);
    Ok(())
}

async fn reset_account(mut trader: Trader, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!("This discards all holdings and trade history. Re-run with --yes to confirm.");
        return Ok(());
    }
    trader.reset().await;
    println!(
        "Account reset to {} {}",
        trader.config().initial_balance,
        trader.config().base_currency
    );
    Ok(())
}

async fn export_results(trader: Trader, filename: Option<PathBuf>) -> anyhow::Result<()> {
    match trader.export(filename.as_deref()).await {
        Some(path) => println!("Results exported to {}", path.display()),
        None => anyhow::bail!("Export failed"),
    }
    Ok(())
}

async fn set_api_keys(mut trader: Trader, key: &str, secret: &str) -> anyhow::Result<()> {
    trader.set_credentials(key, secret).await?;
    if trader.validate_api_keys().await {
        println!("API keys saved and validated");
    } else {
        println!("API keys saved but could not be validated");
    }
    Ok(())
}

async fn auto_execute(
    mut trader: Trader,
    enabled: bool,
    confidence: Option<f64>,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    let confidence = confidence.unwrap_or(trader.config().min_confidence_threshold);
    let interval = interval.unwrap_or(trader.config().suggested_trade_refresh_interval);
    trader.set_auto_execute(enabled, confidence, interval).await;

    let config = trader.config();
    if enabled {
        println!(
            "Auto-execution ENABLED (min confidence {:.2}, every {}s)",
            config.min_confidence_threshold, config.suggested_trade_refresh_interval
        );
    } else {
        println!("Auto-execution DISABLED");
    }
    Ok(())
}

async fn execute_trade(mut trader: Trader, request: TradeRequest) -> anyhow::Result<()> {
    match trader.execute_trade(request).await? {
        Some(trade) => println!(
            "Executed {} {} {} @ {} (value {:.2}, balance {:.2})",
            trade.side, trade.quantity, trade.symbol, trade.price, trade.value, trade.balance_after
        ),
        None => println!("Trade not executed, see log for details"),
    }
    Ok(())
}
