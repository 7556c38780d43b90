//! The strategy instance: one configuration, one portfolio, one exchange handle

use super::runner::until_shutdown;
use crate::client::{ExchangeConnector, MarketData};
use crate::config::{AppSettings, ConfigStore, TradingConfig};
use crate::credentials::{ApiCredentials, CredentialRecovery};
use crate::error::{BotError, Result};
use crate::executor::{ExecutionEngine, TradeOrigin};
use crate::indicators;
use crate::ingester::SuggestedTradeIngestor;
use crate::portfolio::{PerformanceMetrics, PortfolioState};
use crate::storage::{PersistenceManager, ResultsExport, StateSnapshot};
use crate::strategy::SignalGenerator;
use crate::types::{Side, Trade, TradingMode};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Trades shown in the status report
const RECENT_TRADES: usize = 5;

/// Operator-issued trade
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    /// Falls back to the last seen price, then a live lookup
    pub price: Option<Decimal>,
    /// Falls back to the engine's default sizing
    pub quantity: Option<Decimal>,
    pub confidence: Option<f64>,
}

impl TradeRequest {
    pub fn new(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price: None,
            quantity: None,
            confidence: None,
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// One line of the holdings table
#[derive(Debug, Clone, Serialize)]
pub struct HoldingLine {
    pub symbol: String,
    pub quantity: Decimal,
    pub last_price: Option<Decimal>,
    pub value: Option<Decimal>,
}

/// Point-in-time report of the trader
#[derive(Debug, Clone, Serialize)]
pub struct TraderStatus {
    pub is_running: bool,
    pub mode: TradingMode,
    pub base_currency: String,
    /// Masked, empty when no key is configured
    pub api_key: String,
    pub balance: Decimal,
    pub holdings_value: Decimal,
    pub total_value: Decimal,
    pub performance: PerformanceMetrics,
    pub auto_execute: bool,
    pub min_confidence: f64,
    pub refresh_interval_secs: u64,
    pub holdings: Vec<HoldingLine>,
    pub recent_trades: Vec<Trade>,
}

impl fmt::Display for TraderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ccy = &self.base_currency;
        let perf = &self.performance;

        writeln!(f, "=== Trading Bot Status ===")?;
        writeln!(f, "Status: {}", if self.is_running { "RUNNING" } else { "STOPPED" })?;
        writeln!(f, "Mode: {}", self.mode.to_string().to_uppercase())?;
        if self.api_key.is_empty() {
            writeln!(f, "API key: not configured")?;
        } else {
            writeln!(f, "API key: {}", self.api_key)?;
        }
        writeln!(f, "Balance: {:.2} {}", self.balance, ccy)?;
        writeln!(f, "Holdings value: {:.2} {}", self.holdings_value, ccy)?;
        writeln!(f, "Total portfolio value: {:.2} {}", self.total_value, ccy)?;
        writeln!(f, "Total trades: {}", perf.total_trades)?;
        writeln!(f, "Win rate: {:.2}%", perf.win_rate)?;
        writeln!(
            f,
            "Profit/Loss: {:.2} {} ({:.2}%)",
            perf.profit_loss, ccy, perf.return_pct
        )?;
        writeln!(f, "Max drawdown: {:.2}%", perf.max_drawdown)?;
        if self.auto_execute {
            writeln!(
                f,
                "Auto-execute suggested trades: ENABLED (min confidence {:.2}, every {}s)",
                self.min_confidence, self.refresh_interval_secs
            )?;
        } else {
            writeln!(f, "Auto-execute suggested trades: DISABLED")?;
        }

        if !self.holdings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Holdings:")?;
            for line in &self.holdings {
                match (line.last_price, line.value) {
                    (Some(price), Some(value)) => writeln!(
                        f,
                        "  {}: {} @ {} = {:.2} {}",
                        line.symbol, line.quantity, price, value, ccy
                    )?,
                    _ => writeln!(f, "  {}: {} (no price)", line.symbol, line.quantity)?,
                }
            }
        }

        if !self.recent_trades.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recent trades:")?;
            for trade in &self.recent_trades {
                writeln!(
                    f,
                    "  {} {} {} {} @ {} ({})",
                    trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    trade.side,
                    trade.quantity,
                    trade.symbol,
                    trade.price,
                    trade.execution
                )?;
            }
        }
        Ok(())
    }
}

/// Paper/live trader
pub struct Trader {
    settings: AppSettings,
    store: ConfigStore,
    state: PortfolioState,
    engine: ExecutionEngine,
    signals: SignalGenerator,
    ingestor: SuggestedTradeIngestor,
    persistence: PersistenceManager,
    market: Arc<dyn MarketData>,
    connector: Arc<dyn ExchangeConnector>,
    is_running: bool,
}

impl Trader {
    /// Build a trader from the configuration record named in `settings`.
    ///
    /// Restores the last snapshot, recovers missing credentials and connects the
    /// exchange handle when a complete key pair is available. Fails only when
    /// the storage directory cannot be created.
    pub async fn new(
        settings: AppSettings,
        market: Arc<dyn MarketData>,
        connector: Arc<dyn ExchangeConnector>,
    ) -> Result<Self> {
        let store = ConfigStore::load(settings.config_path()).await;
        let persistence = PersistenceManager::new(store.state_path(), settings.export_dir());
        persistence.ensure_dir().await?;

        let config = store.config().clone();
        let mut trader = Self {
            state: PortfolioState::new(config.initial_balance, &config.symbols),
            engine: ExecutionEngine::new(config.mode, config.risk_percentage, config.base_currency.clone()),
            signals: SignalGenerator::new(config.strategy_params.clone()),
            ingestor: SuggestedTradeIngestor::new(settings.suggestion_feed_paths()),
            settings,
            store,
            persistence,
            market,
            connector,
            is_running: false,
        };

        trader.load_state().await;
        trader.recover_credentials().await;
        let credentials = trader.store.credentials();
        trader.connect(&credentials);
        trader.validate_api_keys().await;

        if trader.mode() == TradingMode::Live && trader.engine.exchange().is_none() {
            warn!("Live mode is configured but no exchange connection is available");
        }
        info!(
            "Trader initialized in {} mode with balance: {} {}",
            trader.mode(),
            trader.state.balance,
            trader.store.config().base_currency
        );
        Ok(trader)
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn config(&self) -> &TradingConfig {
        self.store.config()
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    pub fn mode(&self) -> TradingMode {
        self.engine.mode()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    async fn load_state(&mut self) {
        let Some(snapshot) = self.persistence.load_state().await else {
            return;
        };

        let config = self.store.config();
        self.state = snapshot.restore(config.initial_balance, &config.symbols);
        if let Some(mode) = snapshot.mode {
            self.store.set_mode(mode);
            self.engine.set_mode(mode);
        }

        if !self.store.credentials().is_complete() && snapshot.api_keys.is_complete() {
            info!("Restoring API keys from saved state");
            self.store.set_credentials(&snapshot.api_keys);
            self.store.save().await;
        }
    }

    async fn recover_credentials(&mut self) {
        if self.store.credentials().is_complete() {
            return;
        }

        let recovery = CredentialRecovery::standard(
            &self.store.backup_path(),
            self.persistence.state_path(),
            &self.settings.credential_fallback_paths(),
        );
        if let Some(found) = recovery.recover().await {
            self.store.set_credentials(&found.credentials);
            self.store.save().await;
            // The snapshot is itself a recovery source
            self.save_state().await;
        }
    }

    fn connect(&mut self, credentials: &ApiCredentials) {
        if !credentials.is_complete() {
            self.engine.set_exchange(None);
            return;
        }
        match self.connector.connect(credentials) {
            Ok(exchange) => {
                debug!("Exchange client connected with key {}", credentials.masked_key());
                self.engine.set_exchange(Some(exchange));
            }
            Err(e) => {
                error!("Error connecting exchange client: {}", e);
                self.engine.set_exchange(None);
            }
        }
    }

    /// Authenticated round-trip against the exchange. Never fatal.
    pub async fn validate_api_keys(&self) -> bool {
        let Some(exchange) = self.engine.exchange() else {
            info!("API keys not configured, live trading unavailable");
            return false;
        };
        match exchange.ping().await {
            Ok(()) => {
                info!("API keys validated successfully");
                true
            }
            Err(e) => {
                error!("API key validation failed: {}", e);
                false
            }
        }
    }

    /// Persist the current portfolio, credentials and mode
    pub async fn save_state(&self) -> bool {
        let snapshot = StateSnapshot::capture(
            &self.state,
            self.store.credentials(),
            self.mode(),
            self.is_running,
        );
        self.persistence.save_state(&snapshot).await
    }

    /// Switch between paper and live trading. Live requires credentials.
    pub async fn switch_mode(&mut self, mode: TradingMode) -> Result<()> {
        if mode == TradingMode::Live {
            if !self.store.credentials().is_complete() {
                return Err(BotError::NotConfigured("Exchange API credentials".into()));
            }
            if self.engine.exchange().is_none() {
                let credentials = self.store.credentials();
                self.connect(&credentials);
            }
        }

        self.store.set_mode(mode);
        self.engine.set_mode(mode);
        if let Some(changed) = self.store.save().await {
            self.connect(&changed);
        }
        self.save_state().await;
        info!("Switched to {} trading mode", mode);
        Ok(())
    }

    /// Back to the initial balance with no positions or history
    pub async fn reset(&mut self) {
        let config = self.store.config();
        self.state.reset(config.initial_balance, &config.symbols);
        self.save_state().await;
        info!(
            "Account reset to initial balance: {} {}",
            config.initial_balance, config.base_currency
        );
    }

    /// Write a results export. Returns the written path.
    pub async fn export(&self, filename: Option<&Path>) -> Option<PathBuf> {
        let export = ResultsExport::new(self.store.config(), &self.state);
        self.persistence.export_results(filename, &export).await
    }

    /// Store a new key pair, reconnecting the exchange when it changed
    pub async fn set_credentials(&mut self, key: &str, secret: &str) -> Result<()> {
        let credentials = ApiCredentials::new(key.trim(), secret.trim());
        if !credentials.is_complete() {
            return Err(BotError::InvalidInput("API key and secret must not be empty".into()));
        }

        self.store.set_credentials(&credentials);
        if let Some(changed) = self.store.save().await {
            self.connect(&changed);
            self.validate_api_keys().await;
        }
        self.save_state().await;
        info!("API keys updated ({})", credentials.masked_key());
        Ok(())
    }

    /// Configure auto-execution of suggested trades
    pub async fn set_auto_execute(&mut self, enabled: bool, min_confidence: f64, refresh_secs: u64) {
        self.store.set_auto_execute(enabled, min_confidence, refresh_secs);
        self.store.save().await;

        let config = self.store.config();
        if enabled {
            info!(
                "Auto-execution of suggested trades ENABLED (min confidence {}, every {}s)",
                config.min_confidence_threshold, config.suggested_trade_refresh_interval
            );
        } else {
            info!("Auto-execution of suggested trades DISABLED");
        }
    }

    /// Execute an operator-issued trade
    pub async fn execute_trade(&mut self, request: TradeRequest) -> Result<Option<Trade>> {
        let symbol = request.symbol.replace('/', "");
        let price = match request.price {
            Some(price) => price,
            None => self.current_price(&symbol).await?,
        };

        let trade = self
            .engine
            .execute_manual(
                &mut self.state,
                &symbol,
                request.side,
                price,
                request.quantity,
                request.confidence,
            )
            .await?;

        if trade.is_some() {
            self.update_equity_history().await;
            self.save_state().await;
        }
        Ok(trade)
    }

    async fn current_price(&mut self, symbol: &str) -> Result<Decimal> {
        if let Some(price) = self.state.last_prices.get(symbol) {
            return Ok(*price);
        }
        let price = self.market.latest_price(symbol).await?;
        self.state.record_price(symbol, price);
        Ok(price)
    }

    /// Balance plus holdings. Symbols without a known price are looked up first.
    pub async fn calculate_portfolio_value(&mut self) -> Decimal {
        for symbol in self.state.unpriced_symbols() {
            match self.market.latest_price(&symbol).await {
                Ok(price) => self.state.record_price(&symbol, price),
                Err(e) => warn!("Error getting price for {}: {}", symbol, e),
            }
        }
        self.state.total_value()
    }

    /// Append the current portfolio value to the equity history
    pub async fn update_equity_history(&mut self) {
        let value = self.calculate_portfolio_value().await;
        self.state.record_equity(Utc::now(), value);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.state.performance()
    }

    pub async fn status(&mut self) -> TraderStatus {
        let total_value = self.calculate_portfolio_value().await;
        let config = self.store.config();

        let mut holdings: Vec<HoldingLine> = self
            .state
            .holdings
            .iter()
            .filter(|(_, q)| **q > Decimal::ZERO)
            .map(|(symbol, quantity)| {
                let last_price = self.state.last_prices.get(symbol).copied();
                HoldingLine {
                    symbol: symbol.clone(),
                    quantity: *quantity,
                    last_price,
                    value: last_price.map(|p| p.saturating_mul(*quantity)),
                }
            })
            .collect();
        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let history = &self.state.trade_history;
        let recent_trades = history[history.len().saturating_sub(RECENT_TRADES)..].to_vec();
        let credentials = self.store.credentials();

        TraderStatus {
            is_running: self.is_running,
            mode: self.mode(),
            base_currency: config.base_currency.clone(),
            api_key: if credentials.key.is_empty() {
                String::new()
            } else {
                credentials.masked_key()
            },
            balance: self.state.balance,
            holdings_value: total_value.saturating_sub(self.state.balance),
            total_value,
            performance: self.state.performance(),
            auto_execute: config.auto_execute_suggested_trades,
            min_confidence: config.min_confidence_threshold,
            refresh_interval_secs: config.suggested_trade_refresh_interval,
            holdings,
            recent_trades,
        }
    }

    /// One pass over every (symbol, interval), then suggested trades, then an
    /// equity sample and a snapshot.
    ///
    /// Market-data and order failures skip the pair. A missing live exchange
    /// handle aborts the cycle.
    ///
    /// Once `shutdown` is signalled the cycle ends at the next market-data
    /// wait and returns what it executed so far, unsaved. Order placement and
    /// its ledger entry always run to completion.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<Vec<Trade>> {
        let config = self.store.config().clone();
        let mut shutdown = shutdown.clone();
        let mut executed = Vec::new();

        for symbol in &config.symbols {
            for interval in &config.intervals {
                let fetch = self.market.fetch_ohlcv(symbol, interval, self.settings.kline_limit);
                let Some(fetched) = until_shutdown(&mut shutdown, fetch).await else {
                    info!("Shutdown requested, ending trading cycle early");
                    return Ok(executed);
                };
                let candles = match fetched {
                    Ok(candles) => candles,
                    Err(e) => {
                        error!("Error fetching data for {} {}: {}", symbol, interval, e);
                        continue;
                    }
                };
                let Some(price) = candles.last().map(|c| c.close) else {
                    warn!("No data for {} {}", symbol, interval);
                    continue;
                };
                self.state.record_price(symbol, price);

                let bars = indicators::calculate(&candles, self.signals.params());
                let signal = self.signals.generate(&bars);
                debug!(symbol = %symbol, interval = %interval, signal = %signal, "Signal generated");

                match self
                    .engine
                    .execute(&mut self.state, symbol, signal, price, TradeOrigin::strategy())
                    .await
                {
                    Ok(Some(trade)) => executed.push(trade),
                    Ok(None) => {}
                    Err(e @ BotError::NotConfigured(_)) => return Err(e),
                    Err(e) => error!("Error executing {} for {}: {}", signal, symbol, e),
                }
            }
        }

        if let Some(trades) = self
            .ingestor
            .check_and_execute_suggested_trades(&config, &self.engine, &mut self.state, self.market.as_ref())
            .await
        {
            executed.extend(trades);
        }

        if until_shutdown(&mut shutdown, self.update_equity_history()).await.is_none() {
            return Ok(executed);
        }
        self.save_state().await;
        Ok(executed)
    }
}
