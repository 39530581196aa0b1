//! Monotonic ID generation.
//!
//! High-frequency correlation ids (routes, orders-within-an-execution) use a
//! lock-free atomic sequence rather than a UUID, per spec.md §5's
//! lock-free-counter guidance for the Execution Engine. Opaque entity ids
//! (transfers, executions, opportunities, strategy instances) use `Uuid`.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A process-local monotonic counter. Cheap, `Send + Sync`, safe to share
/// via `Arc` across every worker that needs a correlation id.
#[derive(Debug, Default)]
pub struct Sequence(AtomicU64);

impl Sequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns a new id starting at 1 (0 is reserved as "unset").
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub fn new_uuid() -> Uuid {
    Uuid::new_v4()
}
