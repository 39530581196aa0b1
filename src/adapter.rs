//! External collaborator capabilities (spec.md §6): `ExchangeAdapter` and
//! `EventSink`. Both are out-of-scope for this crate's implementation —
//! only the trait boundary lives here, along with a `NullEventSink` used by
//! tests and as the default wiring in `main.rs`.

use crate::error::OmsError;
use crate::models::account::Market;
use crate::models::arbitrage::PriceFeed;
use crate::models::order::{Order, PlacedOrder};
use crate::models::transfer::TransferRequest;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn place_order(&self, account_id: &str, order: &Order) -> Result<PlacedOrder, OmsError>;
    async fn cancel_order(
        &self,
        account_id: &str,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<(), OmsError>;
    async fn get_open_orders(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Vec<PlacedOrder>, OmsError>;
    async fn get_balance(&self, account_id: &str, asset: &str) -> Result<Decimal, OmsError>;
    async fn get_position(&self, account_id: &str, symbol: &str) -> Result<Decimal, OmsError>;
    async fn get_order_book(
        &self,
        account_id: &str,
        symbol: &str,
        depth: u32,
    ) -> Result<PriceFeed, OmsError>;
    async fn set_account(&self, account_id: &str) -> Result<(), OmsError>;
    async fn transfer_between_accounts(
        &self,
        request: &TransferRequest,
    ) -> Result<String, OmsError>;
    /// Market this adapter instance is currently bound to (spot vs futures
    /// endpoint set), used by the router to validate `supports_market`.
    fn market(&self) -> Market {
        Market::Spot
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, subject: &str, payload: &[u8]);
}

/// Best-effort no-op sink: logs at debug level and never blocks trading,
/// matching spec.md §5 "The event sink is best-effort".
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, subject: &str, payload: &[u8]) {
        debug!(
            subject,
            bytes = payload.len(),
            "event sink: no sink configured, dropping publish"
        );
    }
}

/// Publish a JSON-serializable payload, swallowing serialization errors —
/// publish must never block or fail the trading path (spec.md §5).
pub async fn publish_json<T: serde::Serialize>(sink: &dyn EventSink, subject: &str, payload: &T) {
    match serde_json::to_vec(payload) {
        Ok(bytes) => sink.publish(subject, &bytes).await,
        Err(e) => {
            tracing::warn!(subject, error = %e, "failed to serialize event payload");
        }
    }
}
