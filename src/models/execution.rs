//! ExecutionContext and execution report types (spec.md §3, §4.4).

use crate::models::order::{Order, OrderType, Side};
use crate::models::routing::RoutingDecision;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Partial,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Status transitions are strictly monotone.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Partial)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Partial, Completed)
                | (Partial, Failed)
                | (Partial, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedRoute {
    pub order_id: Option<String>,
    pub status: ExecutionStatus,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub id: String,
    pub decision: RoutingDecision,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub route_results: HashMap<String, ExecutedRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub exchange: String,
    pub order_id: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub original_order: Order,
    pub status: ExecutionStatus,
    pub fills: Vec<Fill>,
    pub executed_quantity: Decimal,
    pub total_fees: Decimal,
    pub average_price: Option<Decimal>,
    pub slippage: Option<Decimal>,
    pub errors: Vec<String>,
}

impl ExecutionReport {
    /// Slippage per spec.md §4.4: undefined for market orders.
    pub fn compute_slippage(order: &Order, average_price: Option<Decimal>) -> Option<Decimal> {
        if order.order_type == OrderType::Market {
            return None;
        }
        let avg = average_price?;
        if order.price.is_zero() {
            return None;
        }
        Some(match order.side {
            Side::Buy => (avg - order.price) / order.price,
            Side::Sell => (order.price - avg) / order.price,
        })
    }
}
