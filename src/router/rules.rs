//! Ordered routing rules (spec.md §4.3 step 3).

use crate::models::account::Account;
use crate::models::order::Order;
use rust_decimal::Decimal;

pub trait RoutingRule: Send + Sync {
    fn name(&self) -> &str;
    /// Rules apply in descending priority order.
    fn priority(&self) -> i32;
    /// Whether this rule's condition applies to the order.
    fn matches(&self, order: &Order, value: Decimal) -> bool;
    /// Pick an account from the filtered candidates, or `None` to fall
    /// through to the next rule.
    fn select<'a>(&self, candidates: &'a [Account], order: &Order) -> Option<&'a Account>;
}

/// Priority 100: orders above the large-order threshold prefer a main account.
pub struct LargeOrdersToMain {
    pub threshold: Decimal,
}

impl RoutingRule for LargeOrdersToMain {
    fn name(&self) -> &str {
        "large_orders_to_main"
    }
    fn priority(&self) -> i32 {
        100
    }
    fn matches(&self, _order: &Order, value: Decimal) -> bool {
        value > self.threshold
    }
    fn select<'a>(&self, candidates: &'a [Account], _order: &Order) -> Option<&'a Account> {
        candidates
            .iter()
            .filter(|a| a.account_type == crate::models::account::AccountType::Main)
            .min_by(|a, b| a.account_id.cmp(&b.account_id))
    }
}

/// Priority 90: orders tagged with a strategy prefer an account with the
/// same strategy tag.
pub struct StrategyMatch;

impl RoutingRule for StrategyMatch {
    fn name(&self) -> &str {
        "strategy_match"
    }
    fn priority(&self) -> i32 {
        90
    }
    fn matches(&self, order: &Order, _value: Decimal) -> bool {
        order.strategy_tag().is_some()
    }
    fn select<'a>(&self, candidates: &'a [Account], order: &Order) -> Option<&'a Account> {
        let tag = order.strategy_tag()?;
        candidates
            .iter()
            .filter(|a| a.strategy.as_deref() == Some(tag))
            .min_by(|a, b| a.account_id.cmp(&b.account_id))
    }
}

/// Priority 80: futures orders require a futures-enabled account.
pub struct FuturesRouting;

impl RoutingRule for FuturesRouting {
    fn name(&self) -> &str {
        "futures_routing"
    }
    fn priority(&self) -> i32 {
        80
    }
    fn matches(&self, order: &Order, _value: Decimal) -> bool {
        order.position_side.is_some()
    }
    fn select<'a>(&self, candidates: &'a [Account], _order: &Order) -> Option<&'a Account> {
        candidates
            .iter()
            .filter(|a| a.futures_enabled)
            .min_by(|a, b| a.account_id.cmp(&b.account_id))
    }
}

pub fn default_rules() -> Vec<Box<dyn RoutingRule>> {
    vec![
        Box::new(LargeOrdersToMain {
            threshold: Decimal::new(50_000, 0),
        }),
        Box::new(StrategyMatch),
        Box::new(FuturesRouting),
    ]
}
