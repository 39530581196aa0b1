pub mod snapshot;
pub mod store;

pub use store::{AccountRecord, AccountRegistry, SelectionRequirements};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Background snapshot writer: every `interval`, persist the full account
/// set atomically. Matches the teacher's `tokio::select! { interval.tick()
/// => .., shutdown.recv() => break }` background-loop shape.
pub fn spawn_snapshot_loop(
    registry: Arc<AccountRegistry>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = registry.snapshot().await {
                        error!(error = %e, "account snapshot write failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("snapshot loop shutting down");
                        break;
                    }
                }
            }
        }
    })
}
