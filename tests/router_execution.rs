//! Account Router, Account Registry, and Execution Engine, exercised end to
//! end through the public crate API.

use async_trait::async_trait;
use chrono::Utc;
use oms_core::adapter::{ExchangeAdapter, NullEventSink};
use oms_core::clock::{Clock, FakeClock};
use oms_core::config::{ExecutionConfig, RoutingConfig};
use oms_core::error::OmsError;
use oms_core::execution::ExecutionEngine;
use oms_core::models::account::{Account, AccountType, Balance};
use oms_core::models::arbitrage::PriceFeed;
use oms_core::models::order::{Order, OrderType, PlacedOrder, PlacedOrderStatus, Side, TimeInForce};
use oms_core::models::routing::{Route, RoutingDecision};
use oms_core::models::transfer::TransferRequest;
use oms_core::registry::snapshot::{FileSnapshotStore, InMemorySnapshotStore};
use oms_core::registry::AccountRegistry;
use oms_core::router::AccountRouter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn fake_account(id: &str, exchange: &str, account_type: AccountType, rate_limit_weight: i64) -> Account {
    Account {
        account_id: id.to_string(),
        exchange: exchange.to_string(),
        account_type,
        strategy: None,
        spot_enabled: true,
        futures_enabled: false,
        rate_limit_weight,
        max_position_usdt: Decimal::ZERO,
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        last_used: None,
        metadata: HashMap::new(),
    }
}

fn limit_order(symbol: &str, qty: Decimal, price: Decimal) -> Order {
    Order {
        symbol: symbol.to_string(),
        side: Side::Buy,
        order_type: OrderType::Limit,
        quantity: qty,
        price,
        time_in_force: TimeInForce::GTC,
        position_side: None,
        reduce_only: false,
        metadata: HashMap::new(),
    }
}

async fn registry_with_clock() -> (Arc<AccountRegistry>, Arc<dyn Clock>) {
    let (registry, _fake, clock) = registry_with_fake_clock().await;
    (registry, clock)
}

async fn registry_with_fake_clock() -> (Arc<AccountRegistry>, Arc<FakeClock>, Arc<dyn Clock>) {
    let fake = Arc::new(FakeClock::new(Utc::now()));
    let clock: Arc<dyn Clock> = fake.clone();
    let registry = Arc::new(AccountRegistry::new(
        Arc::new(InMemorySnapshotStore::default()),
        clock.clone(),
    ));
    (registry, fake, clock)
}

/// Test: two active accounts on the same exchange, A lightly used
/// (50/1200) and B heavily used (800/1200); a least-used-strategy router
/// picks A, and A's `last_used`/`used_weight` move forward.
#[tokio::test]
async fn router_selects_least_used_account() {
    let (registry, clock) = registry_with_clock().await;
    registry.create(fake_account("a", "binance", AccountType::Sub, 1200)).await.unwrap();
    registry.create(fake_account("b", "binance", AccountType::Sub, 1200)).await.unwrap();
    for id in ["a", "b"] {
        registry
            .set_balance(id, Balance { total_usdt: dec!(100000), per_asset: HashMap::new() })
            .await
            .unwrap();
    }
    registry.update_rate_limit("a", 50).await.unwrap();
    registry.update_rate_limit("b", 800).await.unwrap();

    let before = clock.now();
    let router = AccountRouter::new(registry.clone(), HashMap::new(), RoutingConfig::default(), clock.clone());
    let order = limit_order("BTCUSDT", dec!(1), dec!(50000));
    let routed = router.route("binance", &order).await.unwrap();

    assert_eq!(routed.account.account_id, "a");
    let a = registry.get("a").await.unwrap();
    assert!(a.last_used.unwrap() >= before);
    let available = registry.available_rate_limit("a").await.unwrap();
    assert_eq!(available, 1200 - 50 - 1);
}

/// Test: an order valued above the large-order threshold routes to the
/// main account even though the sub account has more rate-limit headroom.
#[tokio::test]
async fn large_order_rule_overrides_rate_limit_headroom() {
    let (registry, clock) = registry_with_clock().await;
    registry.create(fake_account("main", "binance", AccountType::Main, 1200)).await.unwrap();
    registry.create(fake_account("sub", "binance", AccountType::Sub, 1200)).await.unwrap();
    for id in ["main", "sub"] {
        registry
            .set_balance(id, Balance { total_usdt: dec!(1000000), per_asset: HashMap::new() })
            .await
            .unwrap();
    }
    registry.update_rate_limit("sub", 10).await.unwrap();

    let router = AccountRouter::new(registry, HashMap::new(), RoutingConfig::default(), clock);
    let order = limit_order("BTCUSDT", dec!(2), dec!(60000)); // value = 120000 > 50000
    let routed = router.route("binance", &order).await.unwrap();
    assert_eq!(routed.account.account_id, "main");
}

/// Boundary: an order of size zero is rejected before any account lookup.
#[tokio::test]
async fn zero_quantity_order_is_validation_error() {
    let (registry, clock) = registry_with_clock().await;
    let router = AccountRouter::new(registry, HashMap::new(), RoutingConfig::default(), clock);
    let order = limit_order("BTCUSDT", dec!(0), dec!(100));
    let err = router.route("binance", &order).await.unwrap_err();
    assert!(matches!(err, OmsError::ValidationFailed(_)));
}

/// Boundary: a charge landing exactly on the 60-second mark is still inside
/// the same window; one second later it rolls into a fresh one.
#[tokio::test]
async fn rate_limit_window_boundary_is_inclusive_at_60_seconds() {
    let (registry, fake, _clock) = registry_with_fake_clock().await;
    registry.create(fake_account("a", "binance", AccountType::Sub, 1200)).await.unwrap();
    registry.update_rate_limit("a", 500).await.unwrap();

    fake.advance(chrono::Duration::seconds(60));
    // Still inside the original window: the new charge adds to 500.
    let available_at_60 = registry.update_rate_limit("a", 100).await.unwrap();
    assert_eq!(available_at_60, 1200 - 600);

    fake.advance(chrono::Duration::seconds(1));
    // One second later the window has rolled; only the new charge counts.
    let available_after = registry.update_rate_limit("a", 50).await.unwrap();
    assert_eq!(available_after, 1200 - 50);
}

/// Two-route priority execution: one exchange reports a partial fill, the
/// other fills in full. The rolled-up report must read `partial`, sum both
/// fills' quantity, and average-weight the fill price.
#[tokio::test]
async fn execution_reports_partial_fill_across_two_routes() {
    struct PartialFillAdapter {
        executed_qty: Decimal,
        avg_price: Decimal,
    }

    #[async_trait]
    impl ExchangeAdapter for PartialFillAdapter {
        async fn place_order(&self, _account_id: &str, order: &Order) -> Result<PlacedOrder, OmsError> {
            let status = if self.executed_qty < order.quantity {
                PlacedOrderStatus::PartiallyFilled
            } else {
                PlacedOrderStatus::Filled
            };
            Ok(PlacedOrder {
                exchange_order_id: "ord-1".to_string(),
                status,
                executed_qty: self.executed_qty,
                avg_price: self.avg_price,
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
            Ok("x".to_string())
        }
    }

    let (registry, clock) = registry_with_clock().await;
    for (id, exchange) in [("x1", "exchangex"), ("y1", "exchangey")] {
        registry.create(fake_account(id, exchange, AccountType::Main, 1200)).await.unwrap();
        registry
            .set_balance(id, Balance { total_usdt: dec!(1000000), per_asset: HashMap::new() })
            .await
            .unwrap();
    }

    let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert(
        "exchangex".to_string(),
        Arc::new(PartialFillAdapter { executed_qty: dec!(3), avg_price: dec!(100) }),
    );
    adapters.insert(
        "exchangey".to_string(),
        Arc::new(PartialFillAdapter { executed_qty: dec!(5), avg_price: dec!(101) }),
    );

    let router = Arc::new(AccountRouter::new(registry, adapters.clone(), RoutingConfig::default(), clock.clone()));
    let engine = ExecutionEngine::new(adapters, router, ExecutionConfig::default(), clock, Arc::new(NullEventSink));

    let decision = RoutingDecision {
        routes: vec![
            Route { exchange: "exchangex".to_string(), symbol: "BTCUSDT".to_string(), quantity: dec!(5), expected_price: dec!(100), priority: 1 },
            Route { exchange: "exchangey".to_string(), symbol: "BTCUSDT".to_string(), quantity: dec!(5), expected_price: dec!(101), priority: 2 },
        ],
        original_order: limit_order("BTCUSDT", dec!(10), dec!(100)),
    };

    let report = engine.execute(decision).await.unwrap();
    assert_eq!(report.status, oms_core::models::execution::ExecutionStatus::Partial);
    assert_eq!(report.executed_quantity, dec!(8));
    assert_eq!(report.fills.len(), 2);
    let avg = report.average_price.unwrap();
    // (3*100 + 5*101) / 8 = 100.625
    assert_eq!(avg, dec!(100.625));
}

/// Round-trip: a snapshot written by one registry, loaded by a fresh one
/// pointed at the same directory, reproduces the same set of account ids.
#[tokio::test]
async fn snapshot_round_trip_preserves_account_set() {
    let dir = std::env::temp_dir().join(format!("oms-core-test-{}", oms_core::ids::new_uuid()));
    let store = Arc::new(FileSnapshotStore::new(dir.clone()));
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));

    let written = Arc::new(AccountRegistry::new(store.clone(), clock.clone()));
    written.create(fake_account("a1", "binance", AccountType::Main, 1200)).await.unwrap();
    written.create(fake_account("a2", "okx", AccountType::Sub, 600)).await.unwrap();
    written.snapshot().await.unwrap();

    let restored = AccountRegistry::new(store, clock);
    restored.restore().await.unwrap();
    let mut ids: Vec<String> = restored.list(&Default::default()).await.into_iter().map(|a| a.account_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}
