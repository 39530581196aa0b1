//! Arbitrage Detector/Executor and Transfer Manager idempotence, exercised
//! end to end through the public crate API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oms_core::adapter::{ExchangeAdapter, NullEventSink};
use oms_core::arbitrage::{ArbitrageDetector, ArbitrageExecutor, ExecutionMode};
use oms_core::clock::{Clock, FakeClock};
use oms_core::config::{ArbitrageConfig, RoutingConfig, TransferConfig};
use oms_core::error::OmsError;
use oms_core::models::account::{Account, AccountType, Balance};
use oms_core::models::arbitrage::PriceFeed;
use oms_core::models::order::{Order, PlacedOrder, PlacedOrderStatus};
use oms_core::models::transfer::{TransferRequest, TransferStatus};
use oms_core::orchestrator::StrategyOrchestrator;
use oms_core::registry::snapshot::InMemorySnapshotStore;
use oms_core::registry::AccountRegistry;
use oms_core::router::AccountRouter;
use oms_core::transfer::TransferManager;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn feed(bid: Decimal, ask: Decimal, bid_qty: Decimal, ask_qty: Decimal, now: DateTime<Utc>) -> PriceFeed {
    PriceFeed { bid, ask, bid_qty, ask_qty, last_update: now }
}

/// Test: with the literal feeds from the arbitrage happy-path scenario
/// (X bid/ask 99.8/100.0, Y bid/ask 100.4/100.5, taker fee 0.001 each side),
/// the detector emits exactly the opportunity the scenario specifies.
#[tokio::test]
async fn detector_emits_literal_happy_path_opportunity() {
    let (detector, mut rx) = ArbitrageDetector::new(ArbitrageConfig::default());
    let now = Utc::now();

    detector.on_price_update("x", "BTCUSDT", feed(dec!(99.8), dec!(100.0), dec!(10), dec!(10), now)).await;
    detector.on_price_update("y", "BTCUSDT", feed(dec!(100.4), dec!(100.5), dec!(10), dec!(10), now)).await;

    let opp = rx.try_recv().expect("expected an opportunity");
    assert_eq!(opp.buy_exchange, "x");
    assert_eq!(opp.sell_exchange, "y");
    assert_eq!(opp.buy_price, dec!(100.0));
    assert_eq!(opp.sell_price, dec!(100.4));
    assert_eq!(opp.max_qty, dec!(10));
    assert!(opp.confidence > Decimal::ZERO);
    // 10*(100.4-100.0) - 10*(100.0*0.001 + 100.4*0.001) = 4 - 2.004 = 1.996
    assert_eq!(opp.net_profit, dec!(1.996));
}

/// Boundary: a spread landing exactly at `min_profit_rate` is rejected, not
/// accepted, since the check is a strict inequality.
#[tokio::test]
async fn detector_rejects_spread_at_exactly_min_profit_rate() {
    let config = ArbitrageConfig { min_profit_rate: dec!(0.01), min_profit_amount: Decimal::ZERO, ..ArbitrageConfig::default() };
    let (detector, mut rx) = ArbitrageDetector::new(config);
    let now = Utc::now();

    // ask=100, bid=101 -> rate exactly 0.01
    detector.on_price_update("x", "ETHUSDT", feed(dec!(99), dec!(100), dec!(10), dec!(10), now)).await;
    detector.on_price_update("y", "ETHUSDT", feed(dec!(101), dec!(102), dec!(10), dec!(10), now)).await;

    assert!(rx.try_recv().is_err());
}

struct FillingAdapter;

#[async_trait]
impl ExchangeAdapter for FillingAdapter {
    async fn place_order(&self, _account_id: &str, order: &Order) -> Result<PlacedOrder, OmsError> {
        Ok(PlacedOrder {
            exchange_order_id: "ord".to_string(),
            status: PlacedOrderStatus::Filled,
            executed_qty: order.quantity,
            avg_price: order.price,
            fee: Decimal::ZERO,
        })
    }
    async fn cancel_order(&self, _: &str, _: &str, _: &str) -> Result<(), OmsError> {
        Ok(())
    }
    async fn get_open_orders(&self, _: &str, _: &str) -> Result<Vec<PlacedOrder>, OmsError> {
        Ok(vec![])
    }
    async fn get_balance(&self, _: &str, _: &str) -> Result<Decimal, OmsError> {
        Ok(dec!(0))
    }
    async fn get_position(&self, _: &str, _: &str) -> Result<Decimal, OmsError> {
        Ok(dec!(0))
    }
    async fn get_order_book(&self, _: &str, _: &str, _: u32) -> Result<PriceFeed, OmsError> {
        Ok(PriceFeed { bid: dec!(0), bid_qty: dec!(0), ask: dec!(0), ask_qty: dec!(0), last_update: Utc::now() })
    }
    async fn set_account(&self, _: &str) -> Result<(), OmsError> {
        Ok(())
    }
    async fn transfer_between_accounts(&self, _: &TransferRequest) -> Result<String, OmsError> {
        Ok("xfer".to_string())
    }
}

async fn two_venue_registry() -> Arc<AccountRegistry> {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
    let registry = Arc::new(AccountRegistry::new(Arc::new(InMemorySnapshotStore::default()), clock));
    for (id, exchange) in [("buy-acct", "x"), ("sell-acct", "y")] {
        registry
            .create(Account {
                account_id: id.to_string(),
                exchange: exchange.to_string(),
                account_type: AccountType::Main,
                strategy: None,
                spot_enabled: true,
                futures_enabled: false,
                rate_limit_weight: 1200,
                max_position_usdt: Decimal::ZERO,
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_used: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        registry
            .set_balance(id, Balance { total_usdt: dec!(1000000), per_asset: HashMap::new() })
            .await
            .unwrap();
    }
    registry
}

/// End to end: detector finds the opportunity, executor fills both legs,
/// net realized profit is positive and no rollback occurs.
#[tokio::test]
async fn detected_opportunity_executes_both_legs_successfully() {
    let (detector, mut rx) = ArbitrageDetector::new(ArbitrageConfig::default());
    let now = Utc::now();
    detector.on_price_update("x", "BTCUSDT", feed(dec!(99.8), dec!(100.0), dec!(10), dec!(10), now)).await;
    detector.on_price_update("y", "BTCUSDT", feed(dec!(100.4), dec!(100.5), dec!(10), dec!(10), now)).await;
    let opp = rx.try_recv().expect("expected an opportunity");

    let registry = two_venue_registry().await;
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(now));
    let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert("x".to_string(), Arc::new(FillingAdapter));
    adapters.insert("y".to_string(), Arc::new(FillingAdapter));
    let router = Arc::new(AccountRouter::new(registry, adapters.clone(), RoutingConfig::default(), clock.clone()));
    let executor = ArbitrageExecutor::new(
        adapters,
        router,
        ArbitrageConfig::default(),
        ExecutionMode::Aggressive,
        clock,
        Arc::new(NullEventSink),
    );

    let result = executor.execute(&opp).await.unwrap();
    assert_eq!(result.status, oms_core::models::arbitrage::OpportunityStatus::Executed);
    assert!(result.realized_profit > Decimal::ZERO);
    assert!(!result.rolled_back);
}

/// Idempotence: executing a transfer twice only moves balances once; the
/// second call returns `NotFound` and leaves both accounts untouched.
#[tokio::test]
async fn second_transfer_execute_is_a_no_op() {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
    let registry = Arc::new(AccountRegistry::new(Arc::new(InMemorySnapshotStore::default()), clock.clone()));
    for id in ["src", "dst"] {
        registry
            .create(Account {
                account_id: id.to_string(),
                exchange: "binance".to_string(),
                account_type: AccountType::Sub,
                strategy: None,
                spot_enabled: true,
                futures_enabled: false,
                rate_limit_weight: 1200,
                max_position_usdt: Decimal::ZERO,
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_used: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
    }
    registry.set_balance("src", Balance { total_usdt: dec!(1000), per_asset: HashMap::new() }).await.unwrap();
    registry.set_balance("dst", Balance { total_usdt: dec!(0), per_asset: HashMap::new() }).await.unwrap();

    let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert("binance".to_string(), Arc::new(FillingAdapter));

    let manager = TransferManager::new(registry.clone(), adapters, TransferConfig::default(), clock.clone(), vec![]);
    let request = TransferRequest {
        from_account: "src".to_string(),
        to_account: "dst".to_string(),
        asset: "USDT".to_string(),
        amount: dec!(100),
        reason: "rebalance".to_string(),
    };
    let pending = manager.request(request, clock.now()).await.unwrap();
    let completed = manager.execute(&pending.id).await.unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);

    let src_after_first = registry.get_balance("src").await.unwrap().total_usdt;
    let dst_after_first = registry.get_balance("dst").await.unwrap().total_usdt;
    assert_eq!(src_after_first, dec!(900));
    assert_eq!(dst_after_first, dec!(100));

    let err = manager.execute(&pending.id).await.unwrap_err();
    assert!(matches!(err, OmsError::NotFound(_)));

    assert_eq!(registry.get_balance("src").await.unwrap().total_usdt, src_after_first);
    assert_eq!(registry.get_balance("dst").await.unwrap().total_usdt, dst_after_first);
}

/// Idempotence: a second `stop_strategy` on an already-stopped strategy
/// returns `Ok` without re-releasing capital or changing status.
#[tokio::test]
async fn second_stop_strategy_is_a_no_op() {
    let orch = StrategyOrchestrator::new(
        oms_core::config::OrchestratorConfig::default(),
        dec!(100000),
        Arc::new(FakeClock::new(Utc::now())),
        Arc::new(NullEventSink),
    );
    let id = orch
        .start_strategy(oms_core::models::strategy::StrategyType::Arbitrage, vec!["a".to_string()])
        .await
        .unwrap();
    orch.stop_strategy(&id).await.unwrap();
    let after_first_stop = orch.get(&id).await.unwrap();

    orch.stop_strategy(&id).await.unwrap();
    let after_second_stop = orch.get(&id).await.unwrap();

    assert_eq!(after_first_stop.status, after_second_stop.status);
    assert_eq!(after_first_stop.stopped_at, after_second_stop.stopped_at);
}
