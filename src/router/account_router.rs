//! Account Router (spec.md §4.3).

use crate::adapter::ExchangeAdapter;
use crate::clock::Clock;
use crate::config::{RoutingConfig, SelectionStrategyKind};
use crate::error::OmsError;
use crate::models::account::{Account, Market};
use crate::models::order::Order;
use crate::registry::AccountRegistry;
use crate::router::rules::{default_rules, RoutingRule};
use crate::router::strategies::{best_fit_full, least_used, lowest_latency, round_robin, Candidate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct AccountRouter {
    registry: Arc<AccountRegistry>,
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    config: RoutingConfig,
    clock: Arc<dyn Clock>,
    rules: Vec<Box<dyn RoutingRule>>,
}

#[derive(Debug, Clone)]
pub struct RoutedAccount {
    pub account: Account,
    pub estimated_weight: i64,
}

impl AccountRouter {
    pub fn new(
        registry: Arc<AccountRegistry>,
        adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
        config: RoutingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut rules = default_rules();
        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self {
            registry,
            adapters,
            config,
            clock,
            rules,
        }
    }

    fn market_for(order: &Order) -> Market {
        if order.is_futures() {
            Market::Futures
        } else {
            Market::Spot
        }
    }

    /// Route one order, with retry-with-fallback across attempts (spec.md
    /// §4.3 "Routing with fallback").
    pub async fn route(&self, exchange: &str, order: &Order) -> Result<RoutedAccount, OmsError> {
        if order.quantity.is_zero() {
            return Err(OmsError::ValidationFailed("order quantity is zero".into()));
        }

        let weight = order.estimated_weight();
        let value = order.value();
        let market = Self::market_for(order);

        let mut excluded: Vec<String> = Vec::new();
        let mut last_err = OmsError::NoSuitableAccount("no attempts made".into());

        for attempt in 0..self.config.max_retry_attempts.max(1) {
            match self
                .route_once(exchange, order, market, value, weight, &excluded)
                .await
            {
                Ok(routed) => return Ok(routed),
                Err(e) => {
                    warn!(attempt, error = %e, "routing attempt failed");
                    last_err = e;
                    if attempt + 1 < self.config.max_retry_attempts {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            self.config.retry_wait_ms,
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_err)
    }

    async fn route_once(
        &self,
        exchange: &str,
        order: &Order,
        market: Market,
        value: rust_decimal::Decimal,
        weight: i64,
        excluded: &[String],
    ) -> Result<RoutedAccount, OmsError> {
        let filter = crate::models::account::AccountFilter {
            exchange: Some(exchange.to_string()),
            account_type: None,
            strategy: None,
            active: Some(true),
            market: Some(market),
            min_balance: None,
        };
        let mut candidates = self.registry.list(&filter).await;
        candidates.retain(|a| !excluded.contains(&a.account_id));
        if candidates.is_empty() {
            return Err(OmsError::NoSuitableAccount(format!(
                "no active candidates on {exchange}"
            )));
        }

        // Step 3: ordered routing rules.
        for rule in &self.rules {
            if rule.matches(order, value) {
                if let Some(account) = rule.select(&candidates, order) {
                    info!(rule = rule.name(), account = %account.account_id, "routing rule matched");
                    return self.finalize(account.clone(), weight).await;
                }
            }
        }

        // Step 4: configured selection strategy.
        let mut enriched = Vec::with_capacity(candidates.len());
        for account in &candidates {
            let metrics = self
                .registry
                .get_routing_metrics(&account.account_id)
                .await
                .unwrap_or_default();
            let available_weight = self
                .registry
                .available_rate_limit(&account.account_id)
                .await
                .unwrap_or(account.rate_limit_weight);
            enriched.push(Candidate {
                account: account.clone(),
                metrics,
                available_weight,
            });
        }

        let now = self.clock.now();
        let chosen = match self.config.strategy {
            SelectionStrategyKind::LeastUsed => least_used(&enriched),
            SelectionStrategyKind::RoundRobin => {
                round_robin(&enriched, now, self.config.rotation_cooldown_secs)
            }
            SelectionStrategyKind::BestFit => {
                let mut with_extras = Vec::with_capacity(enriched.len());
                for c in &enriched {
                    let balance_ok = self.balance_ok(&c.account, value).await;
                    let usage_ratio = if c.account.max_position_usdt > rust_decimal::Decimal::ZERO {
                        (value / c.account.max_position_usdt)
                            .to_string()
                            .parse::<f64>()
                            .unwrap_or(0.0)
                    } else {
                        0.0
                    };
                    with_extras.push((c.clone(), balance_ok, usage_ratio));
                }
                best_fit_full(&with_extras, order)
            }
            SelectionStrategyKind::LowestLatency => lowest_latency(&enriched),
        };

        let account = chosen.ok_or_else(|| {
            OmsError::NoSuitableAccount(format!("selection strategy found no candidate on {exchange}"))
        })?;

        self.finalize(account, weight).await
    }

    /// True if `account` has enough balance to cover `value` and, when a
    /// position cap is configured, the projected position still fits under
    /// `max_position_usdt` (spec.md §4.1.1 candidate filter, §4.3 scoring).
    async fn balance_ok(&self, account: &Account, value: rust_decimal::Decimal) -> bool {
        let balance = self.registry.get_balance(&account.account_id).await.unwrap_or_default();
        if balance.total_usdt < value {
            return false;
        }
        if account.max_position_usdt > rust_decimal::Decimal::ZERO {
            let positions = self
                .registry
                .get_positions(&account.account_id)
                .await
                .unwrap_or_default();
            let projected = positions
                .values()
                .fold(rust_decimal::Decimal::ZERO, |acc, v| acc + v.abs())
                + value;
            if projected > account.max_position_usdt {
                return false;
            }
        }
        true
    }

    async fn finalize(&self, account: Account, weight: i64) -> Result<RoutedAccount, OmsError> {
        if let Some(adapter) = self.adapters.get(&account.exchange) {
            adapter.set_account(&account.account_id).await.ok();
        }
        self.registry
            .update_rate_limit(&account.account_id, weight)
            .await?;
        let mut account = account;
        account.last_used = Some(self.clock.now());
        self.registry.update(account.clone()).await?;
        Ok(RoutedAccount {
            account,
            estimated_weight: weight,
        })
    }

    /// Record the outcome of a routed order (fill success/failure), updating
    /// `RoutingMetrics` per account (spec.md §4.3, §9 Open Question a).
    pub async fn record_outcome(&self, account_id: &str, success: bool, latency_ms: f64) {
        if let Ok(mut metrics) = self.registry.get_routing_metrics(account_id).await {
            if success {
                metrics.record_success(latency_ms);
            } else {
                metrics.record_failure();
            }
            let _ = self.registry.set_routing_metrics(account_id, metrics).await;
        }
    }

    /// Background sweeper: purges routing metrics for accounts idle longer
    /// than `metrics_retention` (spec.md §4.3).
    pub fn spawn_metrics_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _sweep_started = Instant::now();
                        let now = self.clock.now();
                        let accounts = self.registry.list(&Default::default()).await;
                        for account in accounts {
                            if let Some(last_used) = account.last_used {
                                if (now - last_used).num_seconds() > self.config.metrics_retention_secs {
                                    let _ = self
                                        .registry
                                        .set_routing_metrics(&account.account_id, Default::default())
                                        .await;
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::models::account::{AccountType, Balance};
    use crate::models::order::{OrderType, Side, TimeInForce};
    use crate::registry::snapshot::InMemorySnapshotStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;

    fn account(id: &str, account_type: AccountType) -> Account {
        Account {
            account_id: id.to_string(),
            exchange: "binance".to_string(),
            account_type,
            strategy: None,
            spot_enabled: true,
            futures_enabled: false,
            rate_limit_weight: 1200,
            max_position_usdt: Decimal::ZERO,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used: None,
            metadata: StdHashMap::new(),
        }
    }

    use rust_decimal::Decimal;

    fn order(symbol: &str, qty: Decimal, price: Decimal) -> Order {
        Order {
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: qty,
            price,
            time_in_force: TimeInForce::GTC,
            position_side: None,
            reduce_only: false,
            metadata: StdHashMap::new(),
        }
    }

    async fn router() -> (Arc<AccountRegistry>, AccountRouter) {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(InMemorySnapshotStore::default()),
            clock.clone(),
        ));
        let router = AccountRouter::new(registry.clone(), HashMap::new(), RoutingConfig::default(), clock);
        (registry, router)
    }

    #[tokio::test]
    async fn least_used_picks_lower_usage_account() {
        let (registry, router) = router().await;
        registry.create(account("a", AccountType::Sub)).await.unwrap();
        registry.create(account("b", AccountType::Sub)).await.unwrap();
        for id in ["a", "b"] {
            registry
                .set_balance(id, Balance { total_usdt: dec!(100000), per_asset: StdHashMap::new() })
                .await
                .unwrap();
        }
        registry.update_rate_limit("a", 50).await.unwrap();
        registry.update_rate_limit("b", 800).await.unwrap();

        let o = order("BTCUSDT", dec!(1), dec!(50000));
        let routed = router.route("binance", &o).await.unwrap();
        assert_eq!(routed.account.account_id, "a");
    }

    #[tokio::test]
    async fn large_order_prefers_main() {
        let (registry, router) = router().await;
        registry.create(account("main", AccountType::Main)).await.unwrap();
        registry.create(account("sub", AccountType::Sub)).await.unwrap();
        for id in ["main", "sub"] {
            registry
                .set_balance(id, Balance { total_usdt: dec!(1000000), per_asset: StdHashMap::new() })
                .await
                .unwrap();
        }
        registry.update_rate_limit("sub", 10).await.unwrap();

        let o = order("BTCUSDT", dec!(2), dec!(60000)); // value = 120000 > 50000
        let routed = router.route("binance", &o).await.unwrap();
        assert_eq!(routed.account.account_id, "main");
    }

    #[tokio::test]
    async fn best_fit_avoids_account_with_insufficient_balance() {
        let (registry, router) = router().await;
        registry.create(account("rich", AccountType::Sub)).await.unwrap();
        registry.create(account("poor", AccountType::Sub)).await.unwrap();
        registry
            .set_balance("rich", Balance { total_usdt: dec!(100000), per_asset: StdHashMap::new() })
            .await
            .unwrap();
        registry
            .set_balance("poor", Balance { total_usdt: dec!(10), per_asset: StdHashMap::new() })
            .await
            .unwrap();

        let config = RoutingConfig {
            strategy: SelectionStrategyKind::BestFit,
            ..RoutingConfig::default()
        };
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let router = AccountRouter::new(registry, HashMap::new(), config, clock);

        let o = order("BTCUSDT", dec!(1), dec!(50000));
        let routed = router.route("binance", &o).await.unwrap();
        assert_eq!(routed.account.account_id, "rich");
    }

    #[tokio::test]
    async fn zero_size_order_is_validation_error() {
        let (_registry, router) = router().await;
        let o = order("BTCUSDT", dec!(0), dec!(100));
        let err = router.route("binance", &o).await.unwrap_err();
        assert!(matches!(err, OmsError::ValidationFailed(_)));
    }
}
