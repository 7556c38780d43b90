//! Paper Trading Module
//!
//! The [`Trader`] wires configuration, portfolio, strategy, execution and
//! persistence together for one account. [`TradingLoop`] runs it in the
//! background on a fixed interval.


mod runner;
mod trader;

pub use runner::{Command, TradingHandle, TradingLoop, ERROR_COOLDOWN};
pub use trader::{HoldingLine, TradeRequest, Trader, TraderStatus};
