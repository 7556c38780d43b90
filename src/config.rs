//! Configuration
//!
//! Two layers:
//! - [`AppSettings`]: deployment settings (paths, exchange URL) from an optional
//!   TOML file plus `PAPER_TRADER__*` environment overrides.
//! - [`TradingConfig`]: the canonical trading record, persisted as JSON and owned
//!   by [`ConfigStore`].

use crate::credentials::{self, ApiCredentials};
use crate::error::Result;
use crate::types::TradingMode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// File name of the dedicated credential backup, next to the config file
pub const CREDENTIAL_BACKUP_FILE: &str = "api_keys_backup.json";
/// File name of the portfolio snapshot, next to the config file
pub const STATE_FILE: &str = "paper_trading_state.json";

/// Deployment settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// Trading configuration record (JSON)
    #[serde(default = "default_config_file")]
    pub config_file: String,
    /// REST base URL for market data and orders
    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,
    /// Credential files tried after the backup file and the state snapshot
    #[serde(default = "default_credential_fallback_paths")]
    pub credential_fallback_paths: Vec<String>,
    /// Suggested-trade feed locations, first existing wins
    #[serde(default = "default_suggestion_feed_paths")]
    pub suggestion_feed_paths: Vec<String>,
    /// Where results exports land when no explicit path is given
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    /// Bounded wait when stopping the background loop
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
    /// Candles fetched per (symbol, interval)
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,
}

fn default_config_file() -> String {
    "trading_data/trading_config.json".to_string()
}

fn default_exchange_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_credential_fallback_paths() -> Vec<String> {
    vec!["~/.paper_trader/api_keys.json".to_string()]
}

fn default_suggestion_feed_paths() -> Vec<String> {
    vec!["trading_data/live_trading_status.json".to_string()]
}

fn default_export_dir() -> String {
    ".".to_string()
}

fn default_join_timeout_secs() -> u64 {
    10
}

fn default_kline_limit() -> u32 {
    500
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            exchange_url: default_exchange_url(),
            credential_fallback_paths: default_credential_fallback_paths(),
            suggestion_feed_paths: default_suggestion_feed_paths(),
            export_dir: default_export_dir(),
            join_timeout_secs: default_join_timeout_secs(),
            kline_limit: default_kline_limit(),
        }
    }
}

impl AppSettings {
    /// Load settings from `path` (optional) with environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("PAPER_TRADER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("credential_fallback_paths")
                    .with_list_parse_key("suggestion_feed_paths")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn config_path(&self) -> PathBuf {
        expand_path(&self.config_file)
    }

    pub fn credential_fallback_paths(&self) -> Vec<PathBuf> {
        self.credential_fallback_paths.iter().map(|p| expand_path(p)).collect()
    }

    pub fn suggestion_feed_paths(&self) -> Vec<PathBuf> {
        self.suggestion_feed_paths.iter().map(|p| expand_path(p)).collect()
    }

    pub fn export_dir(&self) -> PathBuf {
        expand_path(&self.export_dir)
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}

/// Moving-average / RSI parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    #[serde(default = "default_long_window")]
    pub long_window: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
}

fn default_short_window() -> usize {
    50
}
fn default_long_window() -> usize {
    200
}
fn default_rsi_period() -> usize {
    14
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_rsi_oversold() -> f64 {
    30.0
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
        }
    }
}

/// Trading configuration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Percent of balance committed per BUY (2 = 2%)
    #[serde(default = "default_risk_percentage")]
    pub risk_percentage: Decimal,
    #[serde(default)]
    pub strategy_params: StrategyParams,
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    #[serde(default)]
    pub auto_execute_suggested_trades: bool,
    #[serde(default = "default_min_confidence_threshold")]
    pub min_confidence_threshold: f64,
    /// Seconds between suggested-trade polls
    #[serde(default = "default_suggested_trade_refresh_interval")]
    pub suggested_trade_refresh_interval: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Keys this version does not know about, preserved across saves
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}
fn default_base_currency() -> String {
    "USDT".to_string()
}
fn default_initial_balance() -> Decimal {
    dec!(10000)
}
fn default_risk_percentage() -> Decimal {
    dec!(2)
}
fn default_intervals() -> Vec<String> {
    vec!["1h".to_string()]
}
fn default_stop_loss_pct() -> Decimal {
    dec!(5)
}
fn default_take_profit_pct() -> Decimal {
    dec!(10)
}
fn default_min_confidence_threshold() -> f64 {
    0.75
}
fn default_suggested_trade_refresh_interval() -> u64 {
    60
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            symbols: default_symbols(),
            base_currency: default_base_currency(),
            initial_balance: default_initial_balance(),
            risk_percentage: default_risk_percentage(),
            strategy_params: StrategyParams::default(),
            intervals: default_intervals(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            auto_execute_suggested_trades: false,
            min_confidence_threshold: default_min_confidence_threshold(),
            suggested_trade_refresh_interval: default_suggested_trade_refresh_interval(),
            api_key: String::new(),
            api_secret: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl TradingConfig {
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials::new(self.api_key.clone(), self.api_secret.clone())
    }

    /// Replace out-of-range values with defaults. Returns the names of fields
    /// that were corrected.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();

        if self.symbols.is_empty() {
            self.symbols = default_symbols();
            fixed.push("symbols");
        }
        if self.intervals.is_empty() {
            self.intervals = default_intervals();
            fixed.push("intervals");
        }
        if self.initial_balance < Decimal::ZERO {
            self.initial_balance = default_initial_balance();
            fixed.push("initial_balance");
        }
        if self.risk_percentage <= Decimal::ZERO || self.risk_percentage > dec!(100) {
            self.risk_percentage = default_risk_percentage();
            fixed.push("risk_percentage");
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            self.min_confidence_threshold = self.min_confidence_threshold.clamp(0.0, 1.0);
            fixed.push("min_confidence_threshold");
        }
        if self.suggested_trade_refresh_interval == 0 {
            self.suggested_trade_refresh_interval = 1;
            fixed.push("suggested_trade_refresh_interval");
        }
        let params = &mut self.strategy_params;
        if params.short_window == 0 {
            params.short_window = default_short_window();
            fixed.push("strategy_params.short_window");
        }
        if params.long_window == 0 {
            params.long_window = default_long_window();
            fixed.push("strategy_params.long_window");
        }
        if params.rsi_period == 0 {
            params.rsi_period = default_rsi_period();
            fixed.push("strategy_params.rsi_period");
        }

        fixed
    }
}

/// Owns the trading configuration and its durable record
pub struct ConfigStore {
    path: PathBuf,
    config: TradingConfig,
    /// Credentials the exchange handle was last built from
    synced: ApiCredentials,
}

impl ConfigStore {
    /// Load from `path`. Missing or malformed files fall back to defaults.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut config = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<TradingConfig>(&content) {
                Ok(config) => {
                    info!("Configuration loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    error!("Error parsing config {}: {}", path.display(), e);
                    TradingConfig::default()
                }
            },
            Err(e) => {
                error!("Error loading config {}: {}", path.display(), e);
                TradingConfig::default()
            }
        };

        let fixed = config.sanitize();
        if !fixed.is_empty() {
            warn!("Invalid config values replaced with defaults: {}", fixed.join(", "));
        }

        if config.auto_execute_suggested_trades {
            info!(
                "Auto-execution of suggested trades is ENABLED with min confidence: {}",
                config.min_confidence_threshold
            );
        } else {
            info!("Auto-execution of suggested trades is DISABLED");
        }

        let synced = config.credentials();
        Self { path, config, synced }
    }

    /// In-memory store that starts from `config` (nothing read from disk)
    pub fn with_config(path: impl Into<PathBuf>, config: TradingConfig) -> Self {
        let synced = config.credentials();
        Self {
            path: path.into(),
            config,
            synced,
        }
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the config, state and backup files
    pub fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir().join(CREDENTIAL_BACKUP_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir().join(STATE_FILE)
    }

    pub fn credentials(&self) -> ApiCredentials {
        self.config.credentials()
    }

    pub fn set_mode(&mut self, mode: TradingMode) {
        self.config.mode = mode;
    }

    pub fn set_credentials(&mut self, creds: &ApiCredentials) {
        self.config.api_key = creds.key.clone();
        self.config.api_secret = creds.secret.clone();
    }

    pub fn set_auto_execute(&mut self, enabled: bool, min_confidence: f64, refresh_secs: u64) {
        self.config.auto_execute_suggested_trades = enabled;
        self.config.min_confidence_threshold = min_confidence.clamp(0.0, 1.0);
        self.config.suggested_trade_refresh_interval = refresh_secs.max(1);
    }

    /// Persist the configuration.
    ///
    /// The previous file is copied to `<file>.bak` first; the credential backup
    /// file is refreshed afterwards. Errors are logged, never returned.
    ///
    /// Returns the new credentials when they differ from the ones last synced to
    /// the exchange handle and are complete.
    pub async fn save(&mut self) -> Option<ApiCredentials> {
        if let Err(e) = self.write().await {
            error!("Error saving config: {}", e);
        } else {
            info!("Configuration saved to {}", self.path.display());
        }

        let changed = self.sync_credentials();

        let creds = self.credentials();
        if creds.is_complete() {
            credentials::write_backup(&self.backup_path(), &creds, &self.path).await;
        }

        changed
    }

    async fn write(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.dir()).await?;

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let backup = backup_file_name(&self.path);
            if let Err(e) = tokio::fs::copy(&self.path, &backup).await {
                warn!("Could not create config backup: {}", e);
            }
        }

        let content = serde_json::to_string_pretty(&self.config)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    fn sync_credentials(&mut self) -> Option<ApiCredentials> {
        let current = self.credentials();
        if current == self.synced || !current.is_complete() {
            return None;
        }
        self.synced = current.clone();
        Some(current)
    }
}

/// `<file>.bak` next to `path`
pub fn backup_file_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}
