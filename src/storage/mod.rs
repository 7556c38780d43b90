//! State snapshots and results export
//!
//! The snapshot is the only cross-process view of a [`PortfolioState`]. It also
//! embeds the API credentials so they survive the loss of the config file.
//! Saving never fails past this module: errors are logged and reported as
//! `false`/`None`.


use crate::config::TradingConfig;
use crate::credentials::ApiCredentials;
use crate::error::Result;
use crate::portfolio::{self, PerformanceMetrics, PortfolioState, MAX_EQUITY_HISTORY};
use crate::types::{EquityPoint, Trade, TradingMode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Persisted portfolio snapshot. Missing keys load as defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Absent in the file means "use the initial balance"
    #[serde(default)]
    pub balance: Option<Decimal>,
    /// Absent in the file means "zero for each configured symbol"
    #[serde(default)]
    pub holdings: Option<HashMap<String, Decimal>>,
    #[serde(default)]
    pub open_orders: Vec<serde_json::Value>,
    #[serde(default)]
    pub equity_history: Vec<EquityPoint>,
    #[serde(default)]
    pub trade_history: Vec<Trade>,
    #[serde(default)]
    pub last_prices: HashMap<String, Decimal>,
    #[serde(default)]
    pub api_keys: ApiCredentials,
    #[serde(default)]
    pub mode: Option<TradingMode>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// Snapshot of `state`, keeping the most recent equity samples only
    pub fn capture(
        state: &PortfolioState,
        api_keys: ApiCredentials,
        mode: TradingMode,
        is_running: bool,
    ) -> Self {
        let start = state.equity_history.len().saturating_sub(MAX_EQUITY_HISTORY);
        Self {
            balance: Some(state.balance),
            holdings: Some(state.holdings.clone()),
            open_orders: state.open_orders.clone(),
            equity_history: state.equity_history[start..].to_vec(),
            trade_history: state.trade_history.clone(),
            last_prices: state.last_prices.clone(),
            api_keys,
            mode: Some(mode),
            is_running,
            last_updated: Some(Utc::now()),
        }
    }

    /// Rebuild a portfolio, filling absent fields from the account defaults
    pub fn restore(&self, initial_balance: Decimal, symbols: &[String]) -> PortfolioState {
        let mut equity_history = self.equity_history.clone();
        portfolio::truncate_history(&mut equity_history);

        PortfolioState {
            balance: self.balance.unwrap_or(initial_balance),
            holdings: self
                .holdings
                .clone()
                .unwrap_or_else(|| symbols.iter().map(|s| (s.clone(), Decimal::ZERO)).collect()),
            open_orders: self.open_orders.clone(),
            equity_history,
            trade_history: self.trade_history.clone(),
            last_prices: self.last_prices.clone(),
        }
    }
}

/// Results export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsExport {
    pub config: TradingConfig,
    pub performance: PerformanceMetrics,
    pub equity_history: Vec<EquityPoint>,
    pub trade_history: Vec<Trade>,
    pub final_balance: Decimal,
    pub final_holdings: HashMap<String, Decimal>,
    pub exported_at: DateTime<Utc>,
}

impl ResultsExport {
    pub fn new(config: &TradingConfig, state: &PortfolioState) -> Self {
        Self {
            config: config.clone(),
            performance: state.performance(),
            equity_history: state.equity_history.clone(),
            trade_history: state.trade_history.clone(),
            final_balance: state.balance,
            final_holdings: state.holdings.clone(),
            exported_at: Utc::now(),
        }
    }
}

/// Default export file name for `at`
pub fn results_file_name(at: DateTime<Utc>) -> String {
    format!("trading_results_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Reads and writes the state snapshot and results exports
pub struct PersistenceManager {
    state_path: PathBuf,
    export_dir: PathBuf,
}

impl PersistenceManager {
    pub fn new(state_path: impl Into<PathBuf>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            export_dir: export_dir.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Directory the snapshot lives in
    pub fn state_dir(&self) -> PathBuf {
        match self.state_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Create the storage directory. The only persistence failure that is
    /// reported to the caller.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.state_dir()).await?;
        Ok(())
    }

    /// Write the snapshot. Failures are logged and reported as `false`.
    pub async fn save_state(&self, snapshot: &StateSnapshot) -> bool {
        match self.write_json(&self.state_path, snapshot).await {
            Ok(()) => {
                info!("Trading state saved to {}", self.state_path.display());
                true
            }
            Err(e) => {
                error!("Error saving state: {}", e);
                false
            }
        }
    }

    /// Read the snapshot. Missing or unreadable snapshots yield `None`.
    pub async fn load_state(&self) -> Option<StateSnapshot> {
        let content = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No saved state found, starting fresh");
                return None;
            }
            Err(e) => {
                error!("Error loading state: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<StateSnapshot>(&content) {
            Ok(snapshot) => {
                info!("Trading state loaded from {}", self.state_path.display());
                Some(snapshot)
            }
            Err(e) => {
                error!("Error loading state: {}", e);
                None
            }
        }
    }

    /// Write a results export to `filename`, or to a timestamped file in the
    /// export directory. Returns the written path.
    pub async fn export_results(&self, filename: Option<&Path>, export: &ResultsExport) -> Option<PathBuf> {
        let path = match filename {
            Some(f) => f.to_path_buf(),
            None => self.export_dir.join(results_file_name(export.exported_at)),
        };

        match self.write_json(&path, export).await {
            Ok(()) => {
                info!("Trading results exported to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Error exporting results: {}", e);
                None
            }
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
