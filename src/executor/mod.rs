//! Trade execution and position sizing
//!
//! Paper and live mode share the sizing and bookkeeping below; live mode also
//! forwards a market order to the exchange before the portfolio is touched, so
//! a rejected order never leaves a ledger entry behind.

#[cfg(test)]
mod tests;

use crate::client::Exchange;
use crate::error::{BotError, Result};
use crate::portfolio::{Fill, PortfolioState};
use crate::types::{Side, Signal, Trade, TradingMode};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Decimal places used when the exchange publishes no lot-size rule
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 5;

/// Share of the balance a manual BUY commits when no quantity is given
const MANUAL_BUY_FRACTION: Decimal = dec!(0.05);
/// Share of the position a manual SELL closes when no quantity is given
const MANUAL_SELL_FRACTION: Decimal = dec!(0.5);

/// Where a trade request came from
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeOrigin {
    pub suggested: bool,
    pub confidence: Option<f64>,
}

impl TradeOrigin {
    /// Generated by the indicator strategy
    pub fn strategy() -> Self {
        Self::default()
    }

    /// Forwarded from the suggested-trade feed
    pub fn suggested(confidence: f64) -> Self {
        Self {
            suggested: true,
            confidence: Some(confidence),
        }
    }

    /// Issued by an operator
    pub fn manual(confidence: Option<f64>) -> Self {
        Self {
            suggested: false,
            confidence,
        }
    }
}

/// Floor `quantity` to `decimals` places
pub fn floor_quantity(quantity: Decimal, decimals: u32) -> Decimal {
    quantity.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Decimal places implied by a lot step (`0.00100000` -> 3, `1.0` -> 0)
pub fn step_precision(step: Decimal) -> u32 {
    step.normalize().scale()
}

/// Sizes orders and applies fills to a [`PortfolioState`]
pub struct ExecutionEngine {
    mode: TradingMode,
    risk_percentage: Decimal,
    base_currency: String,
    exchange: Option<Arc<dyn Exchange>>,
}

impl ExecutionEngine {
    pub fn new(mode: TradingMode, risk_percentage: Decimal, base_currency: impl Into<String>) -> Self {
        Self {
            mode,
            risk_percentage,
            base_currency: base_currency.into(),
            exchange: None,
        }
    }

    pub fn set_exchange(&mut self, exchange: Option<Arc<dyn Exchange>>) {
        self.exchange = exchange;
    }

    pub fn exchange(&self) -> Option<&Arc<dyn Exchange>> {
        self.exchange.as_ref()
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TradingMode) {
        self.mode = mode;
    }

    /// Act on a strategy or suggested signal.
    ///
    /// BUY commits `risk_percentage` of the balance; SELL closes the whole
    /// position. Returns `Ok(None)` when the signal does not lead to a trade.
    pub async fn execute(
        &self,
        state: &mut PortfolioState,
        symbol: &str,
        signal: Signal,
        price: Decimal,
        origin: TradeOrigin,
    ) -> Result<Option<Trade>> {
        let Some(side) = signal.side() else {
            return Ok(None);
        };
        if price <= Decimal::ZERO {
            info!("Invalid price {} for {}, skipping {}", price, symbol, side);
            return Ok(None);
        }
        let exchange = self.live_exchange()?;

        if origin.suggested {
            info!(
                "Executing suggested {} for {} (confidence {:.2})",
                side,
                symbol,
                origin.confidence.unwrap_or_default()
            );
        }

        let quantity = match side {
            Side::Buy => {
                if state.balance <= Decimal::ZERO {
                    info!(
                        "Insufficient balance ({} {}) to buy {}",
                        state.balance, self.base_currency, symbol
                    );
                    return Ok(None);
                }

                let Some(raw) = state
                    .balance
                    .checked_mul(self.risk_percentage)
                    .and_then(|amount| amount.checked_div(Decimal::ONE_HUNDRED))
                    .and_then(|amount| amount.checked_div(price))
                else {
                    info!("Order size for {} at {} is out of range, skipping buy", symbol, price);
                    return Ok(None);
                };
                let quantity = self.round_quantity(symbol, raw).await;
                if quantity <= Decimal::ZERO {
                    info!("Calculated quantity too small to execute buy for {}", symbol);
                    return Ok(None);
                }
                quantity
            }
            Side::Sell => {
                let held = state.holding(symbol);
                if held <= Decimal::ZERO {
                    info!("No holdings of {} to sell", symbol);
                    return Ok(None);
                }
                held
            }
        };

        let Some(fill) = state.fill(side, symbol, quantity, price) else {
            info!("Trade value of {} {} at {} is out of range, skipping", quantity, symbol, price);
            return Ok(None);
        };
        if fill.balance_after < Decimal::ZERO {
            info!("Insufficient balance for {} {} at {}", quantity, symbol, price);
            return Ok(None);
        }

        let order_id = self.place(exchange, symbol, side, quantity).await?;
        Ok(Some(self.record(state, symbol, side, quantity, price, fill, order_id, origin)))
    }

    /// Operator-issued trade with an optional explicit quantity.
    ///
    /// Without a quantity, BUY spends 5% of the balance and SELL closes half the
    /// position. Holdings that reach zero are removed.
    pub async fn execute_manual(
        &self,
        state: &mut PortfolioState,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Option<Decimal>,
        confidence: Option<f64>,
    ) -> Result<Option<Trade>> {
        let symbol = symbol.replace('/', "");
        if price <= Decimal::ZERO {
            return Err(BotError::InvalidInput(format!(
                "Invalid price: {}. Must be a positive number.",
                price
            )));
        }
        let exchange = self.live_exchange()?;

        let quantity = match (quantity, side) {
            (Some(q), _) => q,
            (None, Side::Buy) => {
                let raw = (state.balance * MANUAL_BUY_FRACTION)
                    .checked_div(price)
                    .ok_or_else(|| out_of_range(&symbol, price))?;
                self.round_quantity(&symbol, raw).await
            }
            (None, Side::Sell) => {
                if state.holding(&symbol) <= Decimal::ZERO {
                    info!("Cannot sell {}: no holdings found", symbol);
                    return Ok(None);
                }
                self.round_quantity(&symbol, state.holding(&symbol) * MANUAL_SELL_FRACTION)
                    .await
            }
        };
        if quantity <= Decimal::ZERO {
            return Err(BotError::InvalidInput(format!(
                "Invalid quantity: {}. Must be a positive number.",
                quantity
            )));
        }

        let fill = state
            .fill(side, &symbol, quantity, price)
            .ok_or_else(|| out_of_range(&symbol, price))?;
        match side {
            Side::Buy => {
                if fill.value > state.balance {
                    info!("Insufficient balance for trade: {} > {}", fill.value, state.balance);
                    return Ok(None);
                }
            }
            Side::Sell => {
                let held = state.holding(&symbol);
                if quantity > held {
                    info!("Insufficient holdings for trade: {} > {}", quantity, held);
                    return Ok(None);
                }
            }
        }

        let order_id = self.place(exchange, &symbol, side, quantity).await?;
        let trade = self.record(
            state,
            &symbol,
            side,
            quantity,
            price,
            fill,
            order_id,
            TradeOrigin::manual(confidence),
        );
        state.prune_empty(&symbol);
        Ok(Some(trade))
    }

    /// Floor a raw quantity to the tradable precision for `symbol`
    pub async fn round_quantity(&self, symbol: &str, quantity: Decimal) -> Decimal {
        let decimals = match (self.mode, &self.exchange) {
            (TradingMode::Live, Some(exchange)) => match exchange.lot_step_size(symbol).await {
                Ok(Some(step)) if step > Decimal::ZERO => step_precision(step),
                Ok(_) => DEFAULT_QUANTITY_DECIMALS,
                Err(e) => {
                    warn!("Error determining quantity precision for {}: {}", symbol, e);
                    DEFAULT_QUANTITY_DECIMALS
                }
            },
            _ => DEFAULT_QUANTITY_DECIMALS,
        };
        floor_quantity(quantity, decimals)
    }

    /// Exchange handle in live mode, `None` in paper mode
    fn live_exchange(&self) -> Result<Option<&Arc<dyn Exchange>>> {
        match self.mode {
            TradingMode::Paper => Ok(None),
            TradingMode::Live => self
                .exchange
                .as_ref()
                .map(Some)
                .ok_or_else(|| BotError::NotConfigured("Exchange API credentials".into())),
        }
    }

    async fn place(
        &self,
        exchange: Option<&Arc<dyn Exchange>>,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Option<String>> {
        let Some(exchange) = exchange else {
            return Ok(None);
        };

        match exchange.place_market_order(symbol, side, quantity).await {
            Ok(order_id) => Ok(Some(order_id)),
            Err(e) => {
                let kind = e
                    .exchange_kind()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "UNKNOWN".to_string());
                error!(kind = %kind, "Live {} {} {} failed: {}", side, quantity, symbol, e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        state: &mut PortfolioState,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fill: Fill,
        order_id: Option<String>,
        origin: TradeOrigin,
    ) -> Trade {
        state.settle(symbol, price, &fill);

        let trade = Trade {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            value: fill.value,
            balance_after: fill.balance_after,
            holdings_after: fill.holdings_after,
            execution: self.mode,
            order_id,
            suggested: origin.suggested,
            confidence: origin.confidence,
        };
        state.trade_history.push(trade.clone());

        let prefix = match self.mode {
            TradingMode::Paper => "",
            TradingMode::Live => "LIVE ",
        };
        info!(
            "{}{} {} {} at {} = {} {}",
            prefix, side, quantity, symbol, price, fill.value, self.base_currency
        );
        trade
    }
}

fn out_of_range(symbol: &str, price: Decimal) -> BotError {
    BotError::InvalidInput(format!("Trade amount for {} at {} is out of range", symbol, price))
}
