//! Logical order model (spec.md §3).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC,
    IOC,
    FOK,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Zero for market orders.
    pub price: Decimal,
    pub time_in_force: TimeInForce,
    pub position_side: Option<PositionSide>,
    pub reduce_only: bool,
    pub metadata: HashMap<String, String>,
}

impl Order {
    pub fn is_futures(&self) -> bool {
        self.position_side.is_some() || self.reduce_only
    }

    pub fn strategy_tag(&self) -> Option<&str> {
        self.metadata.get("strategy").map(|s| s.as_str())
    }

    /// Estimated rate-limit weight per spec.md §4.3 step 1.
    pub fn estimated_weight(&self) -> i64 {
        let base = match self.order_type {
            OrderType::Market | OrderType::Limit => 1,
            OrderType::Stop | OrderType::StopLimit => 2,
        };
        base + if self.reduce_only { 1 } else { 0 }
    }

    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// A placed/executed order fragment returned by a venue, as reported by an
/// `ExchangeAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub exchange_order_id: String,
    pub status: PlacedOrderStatus,
    pub executed_qty: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacedOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}
