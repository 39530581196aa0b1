//! Durable snapshot layer (spec.md §6 "Persisted state layout").
//!
//! Writes are temp-file + rename so a crash mid-write never corrupts the
//! previous snapshot. Missing files are treated as empty state. The actual
//! storage format is pluggable behind `SnapshotStore` — production uses
//! `FileSnapshotStore`, tests use `InMemorySnapshotStore`.

use crate::models::account::Account;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, accounts: &[Account]) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Vec<Account>>;
}

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("accounts.json")
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, accounts: &[Account]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.snapshot_path();
        let tmp_path = self.dir.join("accounts.json.tmp");
        let bytes = serde_json::to_vec_pretty(accounts)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &final_path)?;
        info!(count = accounts.len(), path = %final_path.display(), "wrote account snapshot");
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Vec<Account>> {
        let path = self.snapshot_path();
        if !path.exists() {
            warn!(path = %path.display(), "no snapshot file found, starting from empty state");
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(&path)?;
        let accounts: Vec<Account> = serde_json::from_slice(&bytes)?;
        Ok(accounts)
    }
}

/// Snapshot store for tests — avoids touching the filesystem.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    data: Mutex<HashMap<String, Account>>,
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, accounts: &[Account]) -> anyhow::Result<()> {
        let mut data = self.data.lock().unwrap();
        data.clear();
        for account in accounts {
            data.insert(account.account_id.clone(), account.clone());
        }
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Vec<Account>> {
        Ok(self.data.lock().unwrap().values().cloned().collect())
    }
}
