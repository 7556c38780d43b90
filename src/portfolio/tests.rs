//! Unit tests for portfolio state

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::types::TradingMode;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn symbols() -> Vec<String> {
        vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
    }

    fn trade(symbol: &str, side: Side, price: Decimal) -> Trade {
        Trade {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            side,
            quantity: dec!(1),
            price,
            value: price,
            balance_after: dec!(0),
            holdings_after: dec!(0),
            execution: TradingMode::Paper,
            order_id: None,
            suggested: false,
            confidence: None,
        }
    }

    fn sci(value: &str) -> Decimal {
        Decimal::from_scientific(value).unwrap()
    }

    fn equity_series(values: &[Decimal]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityPoint {
                timestamp: start + Duration::hours(i as i64),
                equity: *v,
            })
            .collect()
    }

    #[test]
    fn test_new_account() {
        let state = PortfolioState::new(dec!(10000), &symbols());
        assert_eq!(state.balance, dec!(10000));
        assert_eq!(state.holdings.len(), 2);
        assert_eq!(state.holding("BTCUSDT"), Decimal::ZERO);
        assert_eq!(state.holding("UNKNOWN"), Decimal::ZERO);
        assert!(state.trade_history.is_empty());
        assert_eq!(state.equity_history.len(), 1);
        assert_eq!(state.equity_history[0].equity, dec!(10000));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut state = PortfolioState::new(dec!(1000), &symbols());
        let fill = state.fill(Side::Buy, "BTCUSDT", dec!(1), dec!(100)).unwrap();
        state.settle("BTCUSDT", dec!(100), &fill);
        state.record_equity(Utc::now(), dec!(1000));
        state.open_orders.push(serde_json::json!({"id": 1}));

        state.reset(dec!(500), &symbols());
        assert_eq!(state.balance, dec!(500));
        assert_eq!(state.holding("BTCUSDT"), Decimal::ZERO);
        assert!(state.trade_history.is_empty());
        assert_eq!(state.equity_history.len(), 1);
        assert_eq!(state.equity_history[0].equity, dec!(500));
        assert!(state.open_orders.is_empty());
        assert!(state.last_prices.is_empty());
    }

    #[test]
    fn test_settle_buy_and_sell() {
        let mut state = PortfolioState::new(dec!(10000), &symbols());

        let buy = state.fill(Side::Buy, "BTCUSDT", dec!(2), dec!(100)).unwrap();
        assert_eq!(buy.value, dec!(200));
        // Computing a fill leaves the ledger alone
        assert_eq!(state.balance, dec!(10000));

        state.settle("BTCUSDT", dec!(100), &buy);
        assert_eq!(state.balance, dec!(9800));
        assert_eq!(state.holding("BTCUSDT"), dec!(2));
        assert_eq!(state.last_prices["BTCUSDT"], dec!(100));

        let sell = state.fill(Side::Sell, "BTCUSDT", dec!(2), dec!(150)).unwrap();
        state.settle("BTCUSDT", dec!(150), &sell);
        assert_eq!(state.balance, dec!(10100));
        assert_eq!(state.holding("BTCUSDT"), Decimal::ZERO);
    }

    #[test]
    fn test_fill_out_of_range() {
        let mut state = PortfolioState::new(dec!(10000), &symbols());
        let (quantity, price) = (sci("1e20"), sci("1e10"));
        assert!(state.fill(Side::Buy, "BTCUSDT", quantity, price).is_none());

        state.balance = Decimal::MAX;
        state.holdings.insert("BTCUSDT".to_string(), dec!(1));
        assert!(state.fill(Side::Sell, "BTCUSDT", dec!(1), dec!(100)).is_none());
        assert_eq!(state.balance, Decimal::MAX);
    }

    #[test]
    fn test_total_value_saturates() {
        let mut state = PortfolioState::new(dec!(1000), &symbols());
        state.holdings.insert("BTCUSDT".to_string(), sci("1e20"));
        state.record_price("BTCUSDT", sci("1e10"));
        assert_eq!(state.total_value(), Decimal::MAX);
    }

    #[test]
    fn test_prune_empty() {
        let mut state = PortfolioState::new(dec!(100), &symbols());
        state.prune_empty("BTCUSDT");
        assert!(!state.holdings.contains_key("BTCUSDT"));

        let fill = state.fill(Side::Buy, "ETHUSDT", dec!(0.1), dec!(100)).unwrap();
        state.settle("ETHUSDT", dec!(100), &fill);
        state.prune_empty("ETHUSDT");
        assert!(state.holdings.contains_key("ETHUSDT"));
    }

    #[test]
    fn test_total_value_uses_last_prices() {
        let mut state = PortfolioState::new(dec!(1000), &symbols());
        state.holdings.insert("BTCUSDT".to_string(), dec!(2));
        state.holdings.insert("ETHUSDT".to_string(), dec!(3));
        state.record_price("BTCUSDT", dec!(50));

        assert_eq!(state.unpriced_symbols(), vec!["ETHUSDT".to_string()]);
        // ETH has no price yet and contributes nothing
        assert_eq!(state.total_value(), dec!(1100));

        state.record_price("ETHUSDT", dec!(10));
        assert!(state.unpriced_symbols().is_empty());
        assert_eq!(state.total_value(), dec!(1130));
    }

    #[test]
    fn test_equity_history_bounded() {
        let mut state = PortfolioState::default();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..(MAX_EQUITY_HISTORY + 25) {
            state.record_equity(start + Duration::seconds(i as i64), Decimal::from(i));
        }

        assert_eq!(state.equity_history.len(), MAX_EQUITY_HISTORY);
        // Most recent entries survive, in order
        assert_eq!(state.equity_history[0].equity, Decimal::from(25));
        assert_eq!(
            state.equity_history.last().unwrap().equity,
            Decimal::from(MAX_EQUITY_HISTORY + 24)
        );
        assert!(state
            .equity_history
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_metrics_need_two_points() {
        let trades = vec![trade("BTCUSDT", Side::Buy, dec!(100))];
        let metrics = PerformanceMetrics::calculate(&equity_series(&[dec!(1000)]), &trades);
        assert_eq!(metrics.total_trades, 1);
        assert_eq!(metrics.profit_loss, Decimal::ZERO);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn test_metrics_return_and_drawdown() {
        let equity = equity_series(&[dec!(1000), dec!(1200), dec!(900), dec!(1100)]);
        let metrics = PerformanceMetrics::calculate(&equity, &[]);

        assert_eq!(metrics.profit_loss, dec!(100));
        assert_eq!(metrics.return_pct, dec!(10));
        // (1200 - 900) / 1200
        assert!((metrics.max_drawdown - 25.0).abs() < 1e-9);
        assert_eq!(metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_win_rate_pairs_sells_with_last_buy() {
        let trades = vec![
            trade("BTCUSDT", Side::Buy, dec!(100)),
            trade("BTCUSDT", Side::Sell, dec!(150)),
            trade("ETHUSDT", Side::Buy, dec!(50)),
            trade("ETHUSDT", Side::Sell, dec!(40)),
            // Sell without a preceding buy is ignored
            trade("BTCUSDT", Side::Sell, dec!(200)),
        ];
        let equity = equity_series(&[dec!(1000), dec!(1000)]);
        let metrics = PerformanceMetrics::calculate(&equity, &trades);

        assert_eq!(metrics.total_trades, 5);
        assert!((metrics.win_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sharpe_requires_enough_points() {
        let values: Vec<Decimal> = (0..31).map(|i| dec!(1000) + Decimal::from(i % 3)).collect();
        let metrics = PerformanceMetrics::calculate(&equity_series(&values), &[]);
        assert!(metrics.sharpe_ratio != 0.0);

        let flat: Vec<Decimal> = vec![dec!(1000); 40];
        let metrics = PerformanceMetrics::calculate(&equity_series(&flat), &[]);
        assert_eq!(metrics.sharpe_ratio, 0.0);
    }
}
