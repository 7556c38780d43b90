//! Paper/Live Crypto Trading Engine
//!
//! A Rust trading engine that runs a moving-average/RSI strategy against
//! exchange market data, either simulating fills or forwarding orders.
//!
//! ## Architecture
//!
//! ```text
//! TradingLoop → MarketData (klines) → Indicators → SignalGenerator → ExecutionEngine → PortfolioState
//!                                                                        ↑                  ↓
//!                                          SuggestedTradeIngestor (feed file)      PersistenceManager
//!                                                                        ↑
//!                                      ConfigStore + CredentialRecovery (startup)
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod indicators;
pub mod ingester;
pub mod paper;
pub mod portfolio;
pub mod storage;
pub mod strategy;
pub mod types;
