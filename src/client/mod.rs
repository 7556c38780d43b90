//! Exchange collaborators
//!
//! The engine only depends on the traits below. [`BinanceClient`] is the
//! concrete REST implementation used by the CLI.

pub mod binance;

pub use binance::{BinanceClient, BinanceConnector};

use crate::credentials::ApiCredentials;
use crate::error::Result;
use crate::types::{Candle, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Market data fetch contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Candles in chronological order, most recent last
    async fn fetch_ohlcv(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Latest traded price
    async fn latest_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Order placement contract (live mode only)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Place a market order, returning the exchange order id
    async fn place_market_order(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<String>;

    /// Lot-size step for `symbol`, if the exchange publishes one
    async fn lot_step_size(&self, symbol: &str) -> Result<Option<Decimal>>;

    /// Authenticated round-trip used to validate credentials
    async fn ping(&self) -> Result<()>;
}

/// Builds an exchange handle for a credential pair
#[cfg_attr(test, mockall::automock)]
pub trait ExchangeConnector: Send + Sync {
    fn connect(&self, credentials: &ApiCredentials) -> Result<Arc<dyn Exchange>>;
}
