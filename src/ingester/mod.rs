//! Suggested-trade ingestion
//!
//! Another process (the dashboard) writes its current signals to a JSON file:
//!
//! ```json
//! {"signals": [{"symbol": "BTC/USDT", "signal": "BUY", "confidence": 0.82, "currentPrice": 64000.5}]}
//! ```
//!
//! The ingestor polls the first existing candidate file at a bounded rate and
//! forwards confident BUY/SELL suggestions to the execution engine.


use crate::client::MarketData;
use crate::config::TradingConfig;
use crate::error::Result;
use crate::executor::{ExecutionEngine, TradeOrigin};
use crate::portfolio::PortfolioState;
use crate::types::{Signal, SuggestedTrade, Trade};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    signals: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    symbol: String,
    signal: String,
    confidence: f64,
    #[serde(rename = "currentPrice", default)]
    current_price: Option<Decimal>,
}

impl FeedEntry {
    fn into_suggestion(self) -> Option<SuggestedTrade> {
        let signal = match self.signal.trim().to_uppercase().as_str() {
            "BUY" => Signal::Buy,
            "SELL" => Signal::Sell,
            _ => return None,
        };
        Some(SuggestedTrade {
            symbol: self.symbol.replace('/', ""),
            signal,
            confidence: self.confidence,
            price: self.current_price,
        })
    }
}

/// Parse a feed document, keeping BUY/SELL entries only
pub fn parse_feed(content: &str) -> Result<Vec<SuggestedTrade>> {
    let feed: Feed = serde_json::from_str(content)?;
    let trades = feed
        .signals
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<FeedEntry>(value) {
            Ok(entry) => entry.into_suggestion(),
            Err(e) => {
                debug!("Ignoring malformed suggestion: {}", e);
                None
            }
        })
        .collect();
    Ok(trades)
}

/// Polls the suggestion feed and forwards qualifying trades
pub struct SuggestedTradeIngestor {
    feed_paths: Vec<PathBuf>,
    last_checked: Option<Instant>,
}

impl SuggestedTradeIngestor {
    pub fn new(feed_paths: Vec<PathBuf>) -> Self {
        Self {
            feed_paths,
            last_checked: None,
        }
    }

    pub fn feed_paths(&self) -> &[PathBuf] {
        &self.feed_paths
    }

    /// Read suggestions from the first existing feed file. Errors yield an
    /// empty list.
    pub async fn fetch_suggested_trades(&self) -> Vec<SuggestedTrade> {
        for path in &self.feed_paths {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                continue;
            }
            return match read_feed(path).await {
                Ok(trades) => {
                    if !trades.is_empty() {
                        info!("Found {} suggested trades", trades.len());
                    }
                    trades
                }
                Err(e) => {
                    error!("Error fetching suggested trades from {}: {}", path.display(), e);
                    Vec::new()
                }
            };
        }
        Vec::new()
    }

    /// Whether the refresh interval has elapsed since the last check
    pub fn is_due(&self, refresh: Duration) -> bool {
        match self.last_checked {
            None => true,
            Some(at) => at.elapsed() >= refresh,
        }
    }

    /// Execute suggestions that clear the confidence threshold.
    ///
    /// Returns `None` when auto-execution is disabled or the refresh interval
    /// has not elapsed, otherwise the trades that were executed. A failing
    /// suggestion is logged and does not affect the rest.
    pub async fn check_and_execute_suggested_trades(
        &mut self,
        config: &TradingConfig,
        engine: &ExecutionEngine,
        state: &mut PortfolioState,
        market: &dyn MarketData,
    ) -> Option<Vec<Trade>> {
        if !config.auto_execute_suggested_trades {
            return None;
        }
        let refresh = Duration::from_secs(config.suggested_trade_refresh_interval);
        if !self.is_due(refresh) {
            return None;
        }
        self.last_checked = Some(Instant::now());
        info!("Checking for suggested trades...");

        let mut executed = Vec::new();
        for suggestion in self.fetch_suggested_trades().await {
            if suggestion.confidence < config.min_confidence_threshold {
                info!(
                    "Skipping {} for {} - confidence {:.2} below threshold {}",
                    suggestion.signal,
                    suggestion.symbol,
                    suggestion.confidence,
                    config.min_confidence_threshold
                );
                continue;
            }

            let price = match suggestion.price.filter(|p| *p > Decimal::ZERO) {
                Some(price) => price,
                None => match market.latest_price(&suggestion.symbol).await {
                    Ok(price) => price,
                    Err(e) => {
                        error!("Error getting price for {}: {}", suggestion.symbol, e);
                        continue;
                    }
                },
            };

            info!(
                "Auto-executing suggested {} for {} with confidence {:.2} at price {}",
                suggestion.signal, suggestion.symbol, suggestion.confidence, price
            );
            match engine
                .execute(
                    state,
                    &suggestion.symbol,
                    suggestion.signal,
                    price,
                    TradeOrigin::suggested(suggestion.confidence),
                )
                .await
            {
                Ok(Some(trade)) => executed.push(trade),
                Ok(None) => {}
                Err(e) => warn!("Error executing suggested trade for {}: {}", suggestion.symbol, e),
            }
        }
        Some(executed)
    }
}

async fn read_feed(path: &Path) -> Result<Vec<SuggestedTrade>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_feed(&content)
}
