//! InventoryState (spec.md §3, §4.7).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryState {
    /// Signed: positive = net long.
    pub position: Decimal,
    pub average_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_update: DateTime<Utc>,
}

impl InventoryState {
    pub fn flat(now: DateTime<Utc>) -> Self {
        Self {
            position: Decimal::ZERO,
            average_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_update: now,
        }
    }
}
