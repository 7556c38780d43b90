//! Trading strategy implementation


use crate::config::StrategyParams;
use crate::indicators::IndicatorBar;
use crate::types::Signal;
use tracing::debug;

/// Signal generator based on moving-average crossover and RSI thresholds
pub struct SignalGenerator {
    params: StrategyParams,
}

impl SignalGenerator {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Generate a trading signal from the latest two bars
    pub fn generate(&self, bars: &[IndicatorBar]) -> Signal {
        let Some(latest) = bars.last() else {
            return Signal::Hold;
        };
        // With a single bar the previous bar is the latest one, so no crossover
        // can fire and only RSI is evaluated.
        let previous = if bars.len() >= 2 {
            &bars[bars.len() - 2]
        } else {
            latest
        };

        if let Some(signal) = crossover(previous, latest) {
            debug!(signal = %signal, "MA crossover");
            return signal;
        }

        match latest.rsi {
            Some(rsi) if rsi < self.params.rsi_oversold => Signal::Buy,
            Some(rsi) if rsi > self.params.rsi_overbought => Signal::Sell,
            _ => Signal::Hold,
        }
    }
}

fn crossover(previous: &IndicatorBar, latest: &IndicatorBar) -> Option<Signal> {
    let (Some(prev_short), Some(prev_long), Some(short), Some(long)) = (
        previous.sma_short,
        previous.sma_long,
        latest.sma_short,
        latest.sma_long,
    ) else {
        return None;
    };

    if prev_short <= prev_long && short > long {
        Some(Signal::Buy)
    } else if prev_short >= prev_long && short < long {
        Some(Signal::Sell)
    } else {
        None
    }
}
