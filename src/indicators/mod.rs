//! Technical indicators over candle closes
//!
//! Rolling windows that are not yet full yield `None`, so a short history never
//! produces a spurious moving-average or RSI reading.

use crate::config::StrategyParams;
use crate::types::Candle;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// One bar with the indicators the signal generator reads
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorBar {
    pub timestamp: DateTime<Utc>,
    pub close: Decimal,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
}

/// Compute indicators for every candle
pub fn calculate(candles: &[Candle], params: &StrategyParams) -> Vec<IndicatorBar> {
    let closes: Vec<f64> = candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(f64::NAN))
        .collect();

    let sma_short = sma(&closes, params.short_window);
    let sma_long = sma(&closes, params.long_window);
    let ema_short = ema(&closes, params.short_window);
    let ema_long = ema(&closes, params.long_window);
    let rsi = rsi(&closes, params.rsi_period);

    candles
        .iter()
        .enumerate()
        .map(|(i, c)| IndicatorBar {
            timestamp: c.open_time,
            close: c.close,
            sma_short: sma_short[i],
            sma_long: sma_long[i],
            ema_short: ema_short[i],
            ema_long: ema_long[i],
            rsi: rsi[i],
        })
        .collect()
}

/// Simple moving average
pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            let mean = sum / window as f64;
            out.push(mean.is_finite().then_some(mean));
        } else {
            out.push(None);
        }
    }
    out
}

/// Exponential moving average, `alpha = 2 / (span + 1)`, seeded with the first
/// value (no bias adjustment)
pub fn ema(values: &[f64], span: usize) -> Vec<Option<f64>> {
    if span == 0 {
        return vec![None; values.len()];
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for v in values {
        let next = match prev {
            None => *v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        prev = Some(next);
        out.push(next.is_finite().then_some(next));
    }
    out
}

/// RSI with simple rolling means of gains and losses over `period` changes
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    for i in period..values.len() {
        // deltas[i - 1] is the change into bar i
        let window = &deltas[i - period..i];
        let gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss: f64 = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

        out[i] = if loss == 0.0 {
            (gain > 0.0).then_some(100.0)
        } else {
            let rs = gain / loss;
            Some(100.0 - 100.0 / (1.0 + rs))
        };
    }
    out
}
