//! RoutingDecision (spec.md §3).

use crate::models::order::Order;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub exchange: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub expected_price: Decimal,
    /// Lower value = earlier priority group.
    pub priority: u32,
}

impl Route {
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.exchange, self.symbol, self.priority)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub routes: Vec<Route>,
    pub original_order: Order,
}

impl RoutingDecision {
    /// Routes grouped by priority, sorted ascending. Each inner vec keeps
    /// input order.
    pub fn priority_groups(&self) -> Vec<(u32, Vec<&Route>)> {
        let mut priorities: Vec<u32> = self.routes.iter().map(|r| r.priority).collect();
        priorities.sort_unstable();
        priorities.dedup();

        priorities
            .into_iter()
            .map(|p| {
                let group: Vec<&Route> = self.routes.iter().filter(|r| r.priority == p).collect();
                (p, group)
            })
            .collect()
    }
}
