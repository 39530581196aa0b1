//! Transfer (spec.md §3, §4.2).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account: String,
    pub to_account: String,
    pub asset: String,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub from_account: String,
    pub to_account: String,
    pub asset: String,
    pub amount: Decimal,
    pub reason: String,
    pub status: TransferStatus,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub exchange_transfer_id: Option<String>,
}

impl Transfer {
    /// Status transitions are strictly monotone: pending -> completed|failed.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        matches!(
            (self.status, next),
            (TransferStatus::Pending, TransferStatus::Completed)
                | (TransferStatus::Pending, TransferStatus::Failed)
        )
    }
}
