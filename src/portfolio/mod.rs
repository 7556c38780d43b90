//! # Portfolio State
//!
//! In-memory ledger mutated by the execution engine:
//! - cash balance and per-symbol holdings
//! - append-only trade history and open orders
//! - bounded equity history (most recent [`MAX_EQUITY_HISTORY`] samples)
//! - last observed price per symbol, used as the valuation fallback
//!
//! [`PerformanceMetrics`] summarizes the equity and trade history.

#[cfg(test)]
mod tests;

use crate::types::{EquityPoint, Side, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Equity samples kept in memory and in snapshots
pub const MAX_EQUITY_HISTORY: usize = 10_000;

/// Ledger effect of one trade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub value: Decimal,
    pub balance_after: Decimal,
    pub holdings_after: Decimal,
}

/// Points required before a Sharpe ratio is reported
const SHARPE_MIN_POINTS: usize = 30;

/// Cash, positions and history of one trading account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: Decimal,
    pub holdings: HashMap<String, Decimal>,
    /// Not reconciled against the exchange
    pub open_orders: Vec<serde_json::Value>,
    pub equity_history: Vec<EquityPoint>,
    pub trade_history: Vec<Trade>,
    pub last_prices: HashMap<String, Decimal>,
}

impl PortfolioState {
    /// Fresh account with zero holdings for every configured symbol
    pub fn new(initial_balance: Decimal, symbols: &[String]) -> Self {
        let mut state = Self::default();
        state.reset(initial_balance, symbols);
        state
    }

    /// Back to the initial balance, dropping all positions and history.
    /// Equity history restarts with a single sample at the initial balance.
    pub fn reset(&mut self, initial_balance: Decimal, symbols: &[String]) {
        self.balance = initial_balance;
        self.holdings = symbols.iter().map(|s| (s.clone(), Decimal::ZERO)).collect();
        self.open_orders.clear();
        self.equity_history = vec![EquityPoint {
            timestamp: Utc::now(),
            equity: initial_balance,
        }];
        self.trade_history.clear();
        self.last_prices.clear();
    }

    /// Held quantity of `symbol`, zero when unknown
    pub fn holding(&self, symbol: &str) -> Decimal {
        self.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn record_price(&mut self, symbol: &str, price: Decimal) {
        self.last_prices.insert(symbol.to_string(), price);
    }

    /// Amounts after filling `quantity` at `price`, without touching the ledger.
    ///
    /// `None` when any amount falls outside the `Decimal` range. Affordability
    /// is the caller's check.
    pub fn fill(&self, side: Side, symbol: &str, quantity: Decimal, price: Decimal) -> Option<Fill> {
        let value = quantity.checked_mul(price)?;
        let held = self.holding(symbol);
        let (balance_after, holdings_after) = match side {
            Side::Buy => (self.balance.checked_sub(value)?, held.checked_add(quantity)?),
            Side::Sell => (self.balance.checked_add(value)?, held.checked_sub(quantity)?),
        };
        Some(Fill {
            value,
            balance_after,
            holdings_after,
        })
    }

    /// Apply a fill computed by [`PortfolioState::fill`]
    pub fn settle(&mut self, symbol: &str, price: Decimal, fill: &Fill) {
        self.balance = fill.balance_after;
        self.holdings.insert(symbol.to_string(), fill.holdings_after);
        self.record_price(symbol, price);
    }

    /// Drop a holdings entry that has gone to zero
    pub fn prune_empty(&mut self, symbol: &str) {
        if self.holding(symbol).is_zero() {
            self.holdings.remove(symbol);
        }
    }

    /// Symbols with a position but no known price
    pub fn unpriced_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .holdings
            .iter()
            .filter(|(s, q)| **q > Decimal::ZERO && !self.last_prices.contains_key(*s))
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Balance plus positions marked at the last known prices.
    /// Positions without a price contribute nothing; the sum saturates.
    pub fn total_value(&self) -> Decimal {
        self.holdings
            .iter()
            .filter(|(_, q)| **q > Decimal::ZERO)
            .filter_map(|(s, q)| self.last_prices.get(s).map(|p| q.saturating_mul(*p)))
            .fold(self.balance, |acc, v| acc.saturating_add(v))
    }

    /// Append an equity sample, keeping only the most recent entries
    pub fn record_equity(&mut self, timestamp: DateTime<Utc>, equity: Decimal) {
        self.equity_history.push(EquityPoint { timestamp, equity });
        truncate_history(&mut self.equity_history);
    }

    pub fn performance(&self) -> PerformanceMetrics {
        PerformanceMetrics::calculate(&self.equity_history, &self.trade_history)
    }
}

/// Drop the oldest samples beyond [`MAX_EQUITY_HISTORY`]
pub fn truncate_history(history: &mut Vec<EquityPoint>) {
    if history.len() > MAX_EQUITY_HISTORY {
        let excess = history.len() - MAX_EQUITY_HISTORY;
        history.drain(..excess);
    }
}

/// Summary statistics over equity and trade history
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    /// Percent of closed round trips that sold above the buy price
    pub win_rate: f64,
    pub profit_loss: Decimal,
    pub return_pct: Decimal,
    /// Annualized (daily-step) Sharpe ratio, zero below the sample minimum
    pub sharpe_ratio: f64,
    /// Percent drop from peak equity to trough equity
    pub max_drawdown: f64,
}

impl PerformanceMetrics {
    pub fn calculate(equity: &[EquityPoint], trades: &[Trade]) -> Self {
        let total_trades = trades.len();
        let (Some(first), Some(last)) = (equity.first(), equity.last()) else {
            return Self {
                total_trades,
                ..Self::default()
            };
        };
        if equity.len() < 2 {
            return Self {
                total_trades,
                ..Self::default()
            };
        }

        let profit_loss = last.equity.saturating_sub(first.equity);
        let return_pct = if first.equity > Decimal::ZERO {
            profit_loss
                .checked_div(first.equity)
                .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let values: Vec<f64> = equity.iter().filter_map(|p| p.equity.to_f64()).collect();

        Self {
            total_trades,
            win_rate: win_rate(trades),
            profit_loss,
            return_pct,
            sharpe_ratio: sharpe_ratio(&values),
            max_drawdown: max_drawdown(&values),
        }
    }
}

/// Pairs every SELL with the last BUY of the same symbol
fn win_rate(trades: &[Trade]) -> f64 {
    let mut entry: HashMap<&str, Decimal> = HashMap::new();
    let mut completed = 0u32;
    let mut wins = 0u32;

    for trade in trades {
        match trade.side {
            Side::Buy => {
                entry.insert(trade.symbol.as_str(), trade.price);
            }
            Side::Sell => {
                if let Some(bought_at) = entry.remove(trade.symbol.as_str()) {
                    completed += 1;
                    if trade.price > bought_at {
                        wins += 1;
                    }
                }
            }
        }
    }

    if completed == 0 {
        0.0
    } else {
        wins as f64 / completed as f64 * 100.0
    }
}

fn max_drawdown(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    if values.is_empty() || max <= 0.0 {
        return 0.0;
    }
    (max - min) / max * 100.0
}

fn sharpe_ratio(values: &[f64]) -> f64 {
    if values.len() <= SHARPE_MIN_POINTS {
        return 0.0;
    }

    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();

    if std > 0.0 {
        mean / std * 365f64.sqrt()
    } else {
        0.0
    }
}
