//! ArbitrageOpportunity and per-venue price feed (spec.md §3, §4.5).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityStatus {
    Detected,
    Executing,
    Executed,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub id: String,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub max_qty: Decimal,
    pub buy_fee: Decimal,
    pub sell_fee: Decimal,
    pub net_profit: Decimal,
    pub detected_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: OpportunityStatus,
    /// Clamped to [0, 100].
    pub confidence: Decimal,
}

impl ArbitrageOpportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OpportunityStatus::Executed | OpportunityStatus::Expired | OpportunityStatus::Failed
        )
    }
}

/// Latest top-of-book snapshot for one (exchange, symbol) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    pub bid: Decimal,
    pub bid_qty: Decimal,
    pub ask: Decimal,
    pub ask_qty: Decimal,
    pub last_update: DateTime<Utc>,
}

impl PriceFeed {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_update).num_milliseconds() > 1_000
    }
}
