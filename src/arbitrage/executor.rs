//! Arbitrage Executor (spec.md §4.6): two-leg concurrent IOC execution with
//! rollback, daily risk counters, and bounded execution history.
//!
//! Grounded on `other_examples/bc8749f2_clduab11-ninja-gekko__crates-arbitrage-engine-src-lib.rs.rs`
//! for the buy/sell-leg opportunity-execution shape, and the teacher's
//! `risk/risk_manager.rs` for the daily-counter kill-switch pattern.

use crate::adapter::{publish_json, EventSink, ExchangeAdapter};
use crate::clock::Clock;
use crate::config::ArbitrageConfig;
use crate::error::OmsError;
use crate::models::arbitrage::{ArbitrageOpportunity, OpportunityStatus};
use crate::models::order::{Order, OrderType, Side, TimeInForce};
use crate::router::AccountRouter;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Fire both legs regardless of partial fills upstream; accept slippage.
    Aggressive,
    /// Only proceed if both legs can be filled fully within tolerance.
    Passive,
    /// Aggressive on the cheaper leg, passive on the more expensive one.
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegResult {
    pub exchange: String,
    pub filled_qty: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbExecutionResult {
    pub opportunity_id: String,
    pub status: OpportunityStatus,
    pub buy_leg: LegResult,
    pub sell_leg: LegResult,
    pub realized_profit: Decimal,
    pub rolled_back: bool,
    pub executed_at: DateTime<Utc>,
}

struct DailyCounters {
    date: NaiveDate,
    volume: Decimal,
    profit: Decimal,
    consecutive_failures: u32,
}

impl DailyCounters {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            volume: Decimal::ZERO,
            profit: Decimal::ZERO,
            consecutive_failures: 0,
        }
    }
}

pub struct ArbitrageExecutor {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
    router: Arc<AccountRouter>,
    config: ArbitrageConfig,
    mode: ExecutionMode,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    concurrency: Arc<Semaphore>,
    counters: Mutex<DailyCounters>,
    history: Mutex<VecDeque<ArbExecutionResult>>,
}

const HISTORY_CAP: usize = 1000;

impl ArbitrageExecutor {
    pub fn new(
        adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
        router: Arc<AccountRouter>,
        config: ArbitrageConfig,
        mode: ExecutionMode,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_executions));
        let today = clock.now().date_naive();
        Self {
            adapters,
            router,
            config,
            mode,
            clock,
            event_sink,
            concurrency,
            counters: Mutex::new(DailyCounters::new(today)),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
        }
    }

    /// Passive mode demands an exact full fill on both legs; a partial fill
    /// is treated the same as an outright leg failure and unwound.
    fn leg_satisfies_mode(&self, requested: Decimal, leg: &LegResult) -> bool {
        if leg.error.is_some() {
            return false;
        }
        match self.mode {
            ExecutionMode::Passive => leg.filled_qty >= requested,
            ExecutionMode::Aggressive | ExecutionMode::Hybrid => leg.filled_qty > Decimal::ZERO,
        }
    }

    async fn roll_day_if_needed(&self) {
        let today = self.clock.now().date_naive();
        let mut counters = self.counters.lock().await;
        if counters.date != today {
            info!(prior_date = %counters.date, "rolling arbitrage daily counters");
            *counters = DailyCounters::new(today);
        }
    }

    async fn gate(&self, opportunity: &ArbitrageOpportunity) -> Result<(), OmsError> {
        if opportunity.is_expired(self.clock.now()) {
            return Err(OmsError::ValidationFailed("opportunity expired".to_string()));
        }

        self.roll_day_if_needed().await;
        let counters = self.counters.lock().await;

        if counters.consecutive_failures >= self.config.max_consecutive_failures {
            return Err(OmsError::KillSwitch(
                "max consecutive arbitrage failures reached".to_string(),
            ));
        }
        if counters.profit <= -self.config.max_daily_loss {
            return Err(OmsError::KillSwitch("daily arbitrage loss limit reached".to_string()));
        }
        let notional = opportunity.max_qty * opportunity.buy_price;
        if counters.volume + notional > self.config.max_daily_volume {
            return Err(OmsError::LimitExceeded("daily arbitrage volume limit reached".to_string()));
        }
        Ok(())
    }

    fn leg_order(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Order {
        Order {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price,
            time_in_force: TimeInForce::IOC,
            position_side: None,
            reduce_only: false,
            metadata: HashMap::new(),
        }
    }

    /// Passive/Hybrid legs chase the fill by `slippage_tolerance`: buy price
    /// moves up, sell price moves down, so an IOC leg still clears the book
    /// at the opportunity's raw price (spec.md §4.6 step 2). Aggressive mode
    /// trades at the raw price unadjusted.
    fn entry_price(&self, side: Side, raw_price: Decimal) -> Decimal {
        match self.mode {
            ExecutionMode::Aggressive => raw_price,
            ExecutionMode::Passive | ExecutionMode::Hybrid => {
                let slip = raw_price * self.config.slippage_tolerance;
                match side {
                    Side::Buy => raw_price + slip,
                    Side::Sell => raw_price - slip,
                }
            }
        }
    }

    async fn place_leg(&self, exchange: &str, order: &Order) -> LegResult {
        let adapter = match self.adapters.get(exchange) {
            Some(a) => a,
            None => {
                return LegResult {
                    exchange: exchange.to_string(),
                    filled_qty: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    fee: Decimal::ZERO,
                    error: Some(format!("no adapter configured for {exchange}")),
                }
            }
        };

        let routed = match self.router.route(exchange, order).await {
            Ok(r) => r,
            Err(e) => {
                return LegResult {
                    exchange: exchange.to_string(),
                    filled_qty: Decimal::ZERO,
                    avg_price: Decimal::ZERO,
                    fee: Decimal::ZERO,
                    error: Some(e.to_string()),
                }
            }
        };

        match adapter.place_order(&routed.account.account_id, order).await {
            Ok(placed) => LegResult {
                exchange: exchange.to_string(),
                filled_qty: placed.executed_qty,
                avg_price: placed.avg_price,
                fee: placed.fee,
                error: None,
            },
            Err(e) => LegResult {
                exchange: exchange.to_string(),
                filled_qty: Decimal::ZERO,
                avg_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                error: Some(e.to_string()),
            },
        }
    }

    /// Unwind a filled leg by trading back out of it, best-effort.
    async fn rollback_leg(&self, exchange: &str, symbol: &str, side: Side, qty: Decimal, price: Decimal) {
        if qty <= Decimal::ZERO {
            return;
        }
        let reverse_side = match side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };
        let order = Self::leg_order(symbol, reverse_side, qty, price);
        let timeout = std::time::Duration::from_secs(self.config.rollback_timeout_secs);
        match tokio::time::timeout(timeout, self.place_leg(exchange, &order)).await {
            Ok(result) if result.error.is_none() => {
                info!(exchange, symbol, "rolled back leg successfully");
            }
            Ok(result) => {
                error!(exchange, symbol, error = ?result.error, "rollback leg failed");
            }
            Err(_) => {
                error!(exchange, symbol, "rollback leg timed out");
            }
        }
    }

    pub async fn execute(&self, opportunity: &ArbitrageOpportunity) -> Result<ArbExecutionResult, OmsError> {
        self.gate(opportunity).await?;
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| OmsError::Unavailable("executor shutting down".to_string()))?;

        publish_json(self.event_sink.as_ref(), "arbitrage.executing", &opportunity.id).await;

        let buy_price = self.entry_price(Side::Buy, opportunity.buy_price);
        let sell_price = self.entry_price(Side::Sell, opportunity.sell_price);
        let buy_order = Self::leg_order(&opportunity.symbol, Side::Buy, opportunity.max_qty, buy_price);
        let sell_order = Self::leg_order(&opportunity.symbol, Side::Sell, opportunity.max_qty, sell_price);

        let (buy_result, sell_result) = tokio::join!(
            self.place_leg(&opportunity.buy_exchange, &buy_order),
            self.place_leg(&opportunity.sell_exchange, &sell_order),
        );

        let mut rolled_back = false;
        let both_filled = self.leg_satisfies_mode(opportunity.max_qty, &buy_result)
            && self.leg_satisfies_mode(opportunity.max_qty, &sell_result);

        if !both_filled && self.config.auto_rollback {
            if buy_result.error.is_none() && buy_result.filled_qty > Decimal::ZERO {
                self.rollback_leg(
                    &opportunity.buy_exchange,
                    &opportunity.symbol,
                    Side::Buy,
                    buy_result.filled_qty,
                    buy_result.avg_price,
                )
                .await;
                rolled_back = true;
            }
            if sell_result.error.is_none() && sell_result.filled_qty > Decimal::ZERO {
                self.rollback_leg(
                    &opportunity.sell_exchange,
                    &opportunity.symbol,
                    Side::Sell,
                    sell_result.filled_qty,
                    sell_result.avg_price,
                )
                .await;
                rolled_back = true;
            }
        }

        let realized_profit = if both_filled {
            (sell_result.filled_qty * sell_result.avg_price)
                - (buy_result.filled_qty * buy_result.avg_price)
                - buy_result.fee
                - sell_result.fee
        } else {
            Decimal::ZERO
        };

        let status = if both_filled {
            OpportunityStatus::Executed
        } else {
            OpportunityStatus::Failed
        };

        if !both_filled {
            warn!(
                opportunity_id = %opportunity.id,
                buy_error = ?buy_result.error,
                sell_error = ?sell_result.error,
                "arbitrage execution failed on at least one leg"
            );
        }

        {
            let mut counters = self.counters.lock().await;
            counters.volume += opportunity.max_qty * opportunity.buy_price;
            counters.profit += realized_profit;
            if both_filled {
                counters.consecutive_failures = 0;
            } else {
                counters.consecutive_failures += 1;
            }
        }

        let result = ArbExecutionResult {
            opportunity_id: opportunity.id.clone(),
            status,
            buy_leg: buy_result,
            sell_leg: sell_result,
            realized_profit,
            rolled_back,
            executed_at: self.clock.now(),
        };

        {
            let mut history = self.history.lock().await;
            if history.len() >= HISTORY_CAP {
                history.pop_front();
            }
            history.push_back(result.clone());
        }

        publish_json(self.event_sink.as_ref(), "arbitrage.completed", &result).await;
        Ok(result)
    }

    pub async fn history(&self) -> Vec<ArbExecutionResult> {
        self.history.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::RoutingConfig;
    use crate::models::account::{Account, AccountType, Balance};
    use crate::models::arbitrage::PriceFeed;
    use crate::models::order::{PlacedOrder, PlacedOrderStatus};
    use crate::models::transfer::TransferRequest;
    use crate::registry::snapshot::InMemorySnapshotStore;
    use crate::registry::AccountRegistry;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct LegAdapter {
        should_fail: AtomicBool,
    }

    #[async_trait]
    impl ExchangeAdapter for LegAdapter {
        async fn place_order(&self, _account_id: &str, order: &Order) -> Result<PlacedOrder, OmsError> {
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(OmsError::Unavailable("leg rejected".to_string()));
            }
            Ok(PlacedOrder {
                exchange_order_id: "ord-1".to_string(),
                status: PlacedOrderStatus::Filled,
                executed_qty: order.quantity,
                avg_price: order.price,
                fee: dec!(0.1),
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
            Ok(PriceFeed {
                bid: dec!(0),
                bid_qty: dec!(0),
                ask: dec!(0),
                ask_qty: dec!(0),
                last_update: Utc::now(),
            })
        }
        async fn set_account(&self, _: &str) -> Result<(), OmsError> {
            Ok(())
        }
        async fn transfer_between_accounts(&self, _: &TransferRequest) -> Result<String, OmsError> {
            Ok("x".to_string())
        }
    }

    async fn setup(buy_fails: bool) -> ArbitrageExecutor {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(InMemorySnapshotStore::default()),
            clock.clone(),
        ));
        for (id, exchange) in [("a-buy", "binance"), ("a-sell", "okx")] {
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
                .set_balance(
                    id,
                    Balance {
                        total_usdt: dec!(1000000),
                        per_asset: HashMap::new(),
                    },
                )
                .await
                .unwrap();
        }

        let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
        adapters.insert(
            "binance".to_string(),
            Arc::new(LegAdapter {
                should_fail: AtomicBool::new(buy_fails),
            }),
        );
        adapters.insert(
            "okx".to_string(),
            Arc::new(LegAdapter {
                should_fail: AtomicBool::new(false),
            }),
        );

        let router = Arc::new(AccountRouter::new(
            registry,
            adapters.clone(),
            RoutingConfig::default(),
            clock.clone(),
        ));

        ArbitrageExecutor::new(
            adapters,
            router,
            ArbitrageConfig::default(),
            ExecutionMode::Aggressive,
            clock,
            Arc::new(crate::adapter::NullEventSink),
        )
    }

    fn opportunity() -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            id: "opp-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            buy_exchange: "binance".to_string(),
            sell_exchange: "okx".to_string(),
            buy_price: dec!(50000),
            sell_price: dec!(50200),
            max_qty: dec!(0.1),
            buy_fee: dec!(0),
            sell_fee: dec!(0),
            net_profit: dec!(15),
            detected_at: Utc::now(),
            valid_until: Utc::now() + chrono::Duration::seconds(5),
            status: OpportunityStatus::Detected,
            confidence: dec!(90),
        }
    }

    #[tokio::test]
    async fn both_legs_fill_executes_successfully() {
        let executor = setup(false).await;
        let result = executor.execute(&opportunity()).await.unwrap();
        assert_eq!(result.status, OpportunityStatus::Executed);
        assert!(result.realized_profit > Decimal::ZERO);
        assert!(!result.rolled_back);
    }

    #[tokio::test]
    async fn buy_leg_failure_rolls_back_sell_leg() {
        let executor = setup(true).await;
        let result = executor.execute(&opportunity()).await.unwrap();
        assert_eq!(result.status, OpportunityStatus::Failed);
        assert!(result.rolled_back);
    }

    #[tokio::test]
    async fn passive_mode_adjusts_leg_prices_for_slippage() {
        let mut executor = setup(false).await;
        executor.mode = ExecutionMode::Passive;
        executor.config.slippage_tolerance = dec!(0.001);

        let buy_price = executor.entry_price(Side::Buy, dec!(50000));
        let sell_price = executor.entry_price(Side::Sell, dec!(50200));

        assert_eq!(buy_price, dec!(50000) + dec!(50000) * dec!(0.001));
        assert_eq!(sell_price, dec!(50200) - dec!(50200) * dec!(0.001));
    }

    #[tokio::test]
    async fn aggressive_mode_leaves_leg_prices_unadjusted() {
        let executor = setup(false).await;
        assert_eq!(executor.entry_price(Side::Buy, dec!(50000)), dec!(50000));
        assert_eq!(executor.entry_price(Side::Sell, dec!(50200)), dec!(50200));
    }

    #[tokio::test]
    async fn expired_opportunity_is_rejected() {
        let executor = setup(false).await;
        let mut opp = opportunity();
        opp.valid_until = opp.detected_at - chrono::Duration::seconds(1);
        let err = executor.execute(&opp).await.unwrap_err();
        assert!(matches!(err, OmsError::ValidationFailed(_)));
    }
}
