//! Unit tests for the execution engine

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::client::MockExchange;
    use crate::error::ExchangeErrorKind;
    use rust_decimal_macros::dec;

    const SYM: &str = "BTCUSDT";

    fn fresh_state(balance: Decimal) -> PortfolioState {
        PortfolioState::new(balance, &[SYM.to_string()])
    }

    fn sci(value: &str) -> Decimal {
        Decimal::from_scientific(value).unwrap()
    }

    fn paper_engine() -> ExecutionEngine {
        ExecutionEngine::new(TradingMode::Paper, dec!(2), "USDT")
    }

    fn live_engine(exchange: MockExchange) -> ExecutionEngine {
        let mut engine = ExecutionEngine::new(TradingMode::Live, dec!(2), "USDT");
        engine.set_exchange(Some(Arc::new(exchange)));
        engine
    }

    #[test]
    fn test_floor_quantity() {
        assert_eq!(floor_quantity(dec!(1.234567), 5), dec!(1.23456));
        assert_eq!(floor_quantity(dec!(0.000009), 5), dec!(0));
        assert_eq!(floor_quantity(dec!(2.9), 0), dec!(2));
    }

    #[test]
    fn test_step_precision() {
        assert_eq!(step_precision(dec!(0.00001000)), 5);
        assert_eq!(step_precision(dec!(0.001)), 3);
        assert_eq!(step_precision(dec!(1.00000000)), 0);
    }

    #[tokio::test]
    async fn test_hold_is_noop() {
        let mut state = fresh_state(dec!(10000));
        let before = state.clone();
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Hold, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(10000));

        // 2% of 10000 at 100 -> 2 units
        let buy = engine
            .execute(&mut state, SYM, Signal::Buy, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap()
            .expect("buy should execute");
        assert_eq!(buy.quantity, dec!(2));
        assert_eq!(buy.value, dec!(200));
        assert_eq!(buy.balance_after, dec!(9800));
        assert_eq!(buy.holdings_after, dec!(2));
        assert_eq!(buy.execution, TradingMode::Paper);
        assert!(buy.order_id.is_none());
        assert_eq!(state.balance, dec!(9800));
        assert_eq!(state.holding(SYM), dec!(2));

        // Whole position is sold
        let sell = engine
            .execute(&mut state, SYM, Signal::Sell, dec!(150), TradeOrigin::strategy())
            .await
            .unwrap()
            .expect("sell should execute");
        assert_eq!(sell.quantity, dec!(2));
        assert_eq!(sell.value, dec!(300));
        assert_eq!(state.balance, dec!(10100));
        assert_eq!(state.holding(SYM), Decimal::ZERO);
        assert_eq!(state.trade_history.len(), 2);
    }

    #[tokio::test]
    async fn test_buy_with_empty_balance_is_noop() {
        let mut state = fresh_state(dec!(0));
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Buy, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state.balance, dec!(0));
        assert!(state.trade_history.is_empty());
    }

    #[tokio::test]
    async fn test_sell_without_holdings_is_noop() {
        let mut state = fresh_state(dec!(10000));
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Sell, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert!(state.trade_history.is_empty());
        assert_eq!(state.balance, dec!(10000));
    }

    #[tokio::test]
    async fn test_dust_quantity_is_rejected() {
        // 2% of 0.01 at 100000 floors to zero
        let mut state = fresh_state(dec!(0.01));
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Buy, dec!(100000), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state.balance, dec!(0.01));
    }

    #[tokio::test]
    async fn test_non_positive_price_is_noop() {
        let mut state = fresh_state(dec!(10000));
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Buy, dec!(0), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
    }

    #[tokio::test]
    async fn test_buy_conservation_and_non_negativity() {
        let engine = ExecutionEngine::new(TradingMode::Paper, dec!(35), "USDT");
        let mut state = fresh_state(dec!(1000));
        let prices = [
            dec!(101.37),
            dec!(99.99),
            dec!(250.5),
            dec!(0.333),
            dec!(87654.321),
            dec!(12.01),
        ];
        let signals = [Signal::Buy, Signal::Buy, Signal::Sell, Signal::Buy, Signal::Buy, Signal::Sell];

        for round in 0..3 {
            for (i, signal) in signals.iter().enumerate() {
                let price = prices[(i + round) % prices.len()];
                let before = state.balance;
                let trade = engine
                    .execute(&mut state, SYM, *signal, price, TradeOrigin::strategy())
                    .await
                    .unwrap();

                if let Some(trade) = trade {
                    match trade.side {
                        Side::Buy => {
                            assert_eq!(state.balance, before - trade.quantity * trade.price);
                        }
                        Side::Sell => assert_eq!(state.holding(SYM), Decimal::ZERO),
                    }
                    assert_eq!(trade.balance_after, state.balance);
                }
                assert!(state.balance >= Decimal::ZERO);
                assert!(state.holding(SYM) >= Decimal::ZERO);
            }
        }
    }

    #[tokio::test]
    async fn test_out_of_range_signal_is_skipped() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(10000));

        // 200 / 1e-27 does not fit in a Decimal
        let trade = engine
            .execute(&mut state, SYM, Signal::Buy, sci("1e-27"), TradeOrigin::suggested(0.9))
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state.balance, dec!(10000));

        state.holdings.insert(SYM.to_string(), sci("1e20"));
        let trade = engine
            .execute(&mut state, SYM, Signal::Sell, sci("1e10"), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state.holding(SYM), sci("1e20"));
        assert!(state.trade_history.is_empty());
    }

    #[tokio::test]
    async fn test_live_out_of_range_sell_places_no_order() {
        let mut exchange = MockExchange::new();
        exchange.expect_place_market_order().times(0);
        let engine = live_engine(exchange);
        let mut state = fresh_state(dec!(10000));
        state.holdings.insert(SYM.to_string(), sci("1e20"));

        let trade = engine
            .execute(&mut state, SYM, Signal::Sell, sci("1e10"), TradeOrigin::strategy())
            .await
            .unwrap();
        assert!(trade.is_none());
        assert_eq!(state.balance, dec!(10000));
    }

    #[tokio::test]
    async fn test_suggested_metadata_recorded() {
        let mut state = fresh_state(dec!(10000));
        let trade = paper_engine()
            .execute(&mut state, SYM, Signal::Buy, dec!(100), TradeOrigin::suggested(0.9))
            .await
            .unwrap()
            .unwrap();
        assert!(trade.suggested);
        assert_eq!(trade.confidence, Some(0.9));
    }

    #[tokio::test]
    async fn test_live_without_exchange_is_not_configured() {
        let engine = ExecutionEngine::new(TradingMode::Live, dec!(2), "USDT");
        let mut state = fresh_state(dec!(10000));
        let err = engine
            .execute(&mut state, SYM, Signal::Buy, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::NotConfigured(_)));
        assert!(state.trade_history.is_empty());
    }

    #[tokio::test]
    async fn test_live_buy_uses_lot_step_and_order_id() {
        let mut exchange = MockExchange::new();
        exchange
            .expect_lot_step_size()
            .returning(|_| Ok(Some(dec!(0.01000000))));
        exchange
            .expect_place_market_order()
            .withf(|symbol, side, quantity| symbol == SYM && *side == Side::Buy && *quantity == dec!(0.06))
            .times(1)
            .returning(|_, _, _| Ok("12345".to_string()));

        let engine = live_engine(exchange);
        let mut state = fresh_state(dec!(1000));

        // 2% of 1000 at 300 = 0.0666.. -> 0.06 with a 0.01 step
        let trade = engine
            .execute(&mut state, SYM, Signal::Buy, dec!(300), TradeOrigin::strategy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.quantity, dec!(0.06));
        assert_eq!(trade.order_id.as_deref(), Some("12345"));
        assert_eq!(trade.execution, TradingMode::Live);
        assert_eq!(state.balance, dec!(982));
    }

    #[tokio::test]
    async fn test_live_lot_step_error_falls_back_to_default_precision() {
        let mut exchange = MockExchange::new();
        exchange
            .expect_lot_step_size()
            .returning(|_| Err(BotError::exchange(ExchangeErrorKind::Network, "timeout")));
        exchange
            .expect_place_market_order()
            .returning(|_, _, _| Ok("1".to_string()));

        let engine = live_engine(exchange);
        let mut state = fresh_state(dec!(1000));
        let trade = engine
            .execute(&mut state, SYM, Signal::Buy, dec!(300), TradeOrigin::strategy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trade.quantity, dec!(0.06666));
    }

    #[tokio::test]
    async fn test_live_exchange_failure_leaves_state_untouched() {
        let mut exchange = MockExchange::new();
        exchange.expect_lot_step_size().returning(|_| Ok(None));
        exchange.expect_place_market_order().times(1).returning(|_, _, _| {
            Err(BotError::exchange(
                ExchangeErrorKind::InsufficientFunds,
                "Account has insufficient balance",
            ))
        });

        let engine = live_engine(exchange);
        let mut state = fresh_state(dec!(1000));
        let before = state.clone();

        let err = engine
            .execute(&mut state, SYM, Signal::Buy, dec!(100), TradeOrigin::strategy())
            .await
            .unwrap_err();
        assert_eq!(err.exchange_kind(), Some(ExchangeErrorKind::InsufficientFunds));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_live_sell_failure_keeps_position() {
        let mut exchange = MockExchange::new();
        exchange
            .expect_place_market_order()
            .returning(|_, _, _| Err(BotError::exchange(ExchangeErrorKind::Auth, "Invalid API-key")));

        let engine = live_engine(exchange);
        let mut state = fresh_state(dec!(1000));
        state.holdings.insert(SYM.to_string(), dec!(3));

        assert!(engine
            .execute(&mut state, SYM, Signal::Sell, dec!(100), TradeOrigin::strategy())
            .await
            .is_err());
        assert_eq!(state.holding(SYM), dec!(3));
        assert!(state.trade_history.is_empty());
    }

    #[tokio::test]
    async fn test_manual_defaults() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(10000));

        // 5% of 10000 at 100
        let buy = engine
            .execute_manual(&mut state, "BTC/USDT", Side::Buy, dec!(100), None, Some(0.75))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buy.symbol, SYM);
        assert_eq!(buy.quantity, dec!(5));
        assert_eq!(buy.confidence, Some(0.75));
        assert!(!buy.suggested);

        // Half the position
        let sell = engine
            .execute_manual(&mut state, SYM, Side::Sell, dec!(120), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sell.quantity, dec!(2.5));
        assert_eq!(state.holding(SYM), dec!(2.5));
        assert_eq!(state.balance, dec!(10000) - dec!(500) + dec!(300));
    }

    #[tokio::test]
    async fn test_manual_sell_all_removes_holding() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(1000));
        state.holdings.insert(SYM.to_string(), dec!(1.5));

        engine
            .execute_manual(&mut state, SYM, Side::Sell, dec!(10), Some(dec!(1.5)), None)
            .await
            .unwrap()
            .unwrap();
        assert!(!state.holdings.contains_key(SYM));
        assert_eq!(state.balance, dec!(1015));
    }

    #[tokio::test]
    async fn test_manual_rejections() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(100));

        // Cost above balance
        let trade = engine
            .execute_manual(&mut state, SYM, Side::Buy, dec!(50), Some(dec!(3)), None)
            .await
            .unwrap();
        assert!(trade.is_none());

        // More than held
        state.holdings.insert(SYM.to_string(), dec!(1));
        let trade = engine
            .execute_manual(&mut state, SYM, Side::Sell, dec!(50), Some(dec!(2)), None)
            .await
            .unwrap();
        assert!(trade.is_none());

        // No position to default from
        let trade = engine
            .execute_manual(&mut state, "ETHUSDT", Side::Sell, dec!(50), None, None)
            .await
            .unwrap();
        assert!(trade.is_none());

        let err = engine
            .execute_manual(&mut state, SYM, Side::Buy, dec!(-1), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        let err = engine
            .execute_manual(&mut state, SYM, Side::Buy, dec!(10), Some(dec!(0)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        assert_eq!(state.balance, dec!(100));
        assert!(state.trade_history.is_empty());
    }

    #[tokio::test]
    async fn test_manual_out_of_range_is_invalid_input() {
        let engine = paper_engine();
        let mut state = fresh_state(dec!(10000));

        let err = engine
            .execute_manual(&mut state, SYM, Side::Buy, sci("1e10"), Some(sci("1e20")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        // Default sizing at a near-zero price
        let err = engine
            .execute_manual(&mut state, SYM, Side::Buy, sci("1e-27"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::InvalidInput(_)));

        assert_eq!(state.balance, dec!(10000));
        assert!(state.trade_history.is_empty());
    }
}
