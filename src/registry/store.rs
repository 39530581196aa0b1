//! Account & Balance Registry (spec.md §4.1).
//!
//! A single `RwLock<HashMap<String, AccountRecord>>` guards all mutable
//! registry state — accounts, balances, positions, rate limits, and routing
//! metrics — per spec.md §5's "single reader-writer lock per registry"
//! discipline. No lock is held across adapter I/O.

use crate::clock::Clock;
use crate::error::OmsError;
use crate::models::account::{
    Account, AccountFilter, AccountType, Balance, RateLimitInfo, RoutingMetrics,
};
use crate::registry::snapshot::SnapshotStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct AccountRecord {
    pub account: Account,
    pub balance: Balance,
    pub positions: HashMap<String, Decimal>,
    pub rate_limit: Option<RateLimitInfo>,
    pub routing_metrics: RoutingMetrics,
}

/// Requirements for `select`, derived from an order by the Account Router.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequirements {
    pub exchange: String,
    pub market: crate::models::account::Market,
    pub strategy: Option<String>,
    pub min_balance: Decimal,
    /// Order notional value; zero means skip the position-size projection.
    pub order_value: Decimal,
}

pub struct AccountRegistry {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    snapshot_store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
}

impl AccountRegistry {
    pub fn new(snapshot_store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            snapshot_store,
            clock,
        }
    }

    /// Load the snapshot at startup. Missing file is equivalent to empty.
    pub async fn restore(&self) -> anyhow::Result<()> {
        let accounts = self.snapshot_store.load().await?;
        let mut guard = self.accounts.write().await;
        for account in accounts {
            guard.insert(
                account.account_id.clone(),
                AccountRecord {
                    account,
                    ..Default::default()
                },
            );
        }
        info!(count = guard.len(), "restored account registry from snapshot");
        Ok(())
    }

    pub async fn snapshot(&self) -> anyhow::Result<()> {
        let guard = self.accounts.read().await;
        let accounts: Vec<Account> = guard.values().map(|r| r.account.clone()).collect();
        drop(guard);
        self.snapshot_store.save(&accounts).await
    }

    pub async fn create(&self, mut account: Account) -> Result<Account, OmsError> {
        let mut guard = self.accounts.write().await;
        if guard.contains_key(&account.account_id) {
            return Err(OmsError::AlreadyExists(account.account_id.clone()));
        }
        let now = self.clock.now();
        account.active = true;
        account.created_at = now;
        account.updated_at = now;
        account.last_used = None;
        guard.insert(
            account.account_id.clone(),
            AccountRecord {
                account: account.clone(),
                ..Default::default()
            },
        );
        Ok(account)
    }

    pub async fn update(&self, mut account: Account) -> Result<Account, OmsError> {
        let mut guard = self.accounts.write().await;
        let existing = guard
            .get(&account.account_id)
            .ok_or_else(|| OmsError::NotFound(account.account_id.clone()))?;
        account.created_at = existing.account.created_at;
        account.updated_at = self.clock.now();
        guard.get_mut(&account.account_id).unwrap().account = account.clone();
        Ok(account)
    }

    /// Soft delete: sets `active = false`, never purges the record.
    pub async fn delete(&self, account_id: &str) -> Result<(), OmsError> {
        let mut guard = self.accounts.write().await;
        let record = guard
            .get_mut(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;
        record.account.active = false;
        record.account.updated_at = self.clock.now();
        Ok(())
    }

    pub async fn get(&self, account_id: &str) -> Result<Account, OmsError> {
        let guard = self.accounts.read().await;
        guard
            .get(account_id)
            .map(|r| r.account.clone())
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))
    }

    pub async fn list(&self, filter: &AccountFilter) -> Vec<Account> {
        let guard = self.accounts.read().await;
        guard
            .values()
            .filter(|r| Self::matches_filter(r, filter))
            .map(|r| r.account.clone())
            .collect()
    }

    fn matches_filter(record: &AccountRecord, filter: &AccountFilter) -> bool {
        let account = &record.account;
        if let Some(ref exchange) = filter.exchange {
            if &account.exchange != exchange {
                return false;
            }
        }
        if let Some(account_type) = filter.account_type {
            if account.account_type != account_type {
                return false;
            }
        }
        if let Some(ref strategy) = filter.strategy {
            if account.strategy.as_deref() != Some(strategy.as_str()) {
                return false;
            }
        }
        if let Some(active) = filter.active {
            if account.active != active {
                return false;
            }
        }
        if let Some(market) = filter.market {
            if !account.supports_market(market) {
                return false;
            }
        }
        if let Some(min_balance) = filter.min_balance {
            if record.balance.total_usdt < min_balance {
                return false;
            }
        }
        true
    }

    /// Candidate selection per spec.md §4.1.1.
    pub async fn select(
        &self,
        requirements: &SelectionRequirements,
    ) -> Result<Account, OmsError> {
        let now = self.clock.now();
        let mut guard = self.accounts.write().await;

        let mut candidates: Vec<&mut AccountRecord> = guard
            .values_mut()
            .filter(|r| {
                let account = &r.account;
                if !account.active || account.exchange != requirements.exchange {
                    return false;
                }
                if let Some(ref strategy) = requirements.strategy {
                    if account.strategy.as_deref() != Some(strategy.as_str()) {
                        return false;
                    }
                }
                if !account.supports_market(requirements.market) {
                    return false;
                }
                if r.balance.total_usdt < requirements.min_balance {
                    return false;
                }
                let rate_limit_ok = r
                    .rate_limit
                    .as_ref()
                    .map(|rl| rl.available(account.rate_limit_weight, now) > 0)
                    .unwrap_or(true);
                if !rate_limit_ok {
                    return false;
                }
                if requirements.order_value > Decimal::ZERO && account.max_position_usdt > Decimal::ZERO {
                    let projected = r
                        .positions
                        .values()
                        .fold(Decimal::ZERO, |acc, v| acc + v.abs())
                        + requirements.order_value;
                    if projected > account.max_position_usdt {
                        return false;
                    }
                }
                true
            })
            .collect();

        if candidates.is_empty() {
            return Err(OmsError::NoSuitableAccount(format!(
                "no active account on {} matches requirements",
                requirements.exchange
            )));
        }

        // Most remaining rate-limit weight wins; tie-break by account_id lexicographically.
        candidates.sort_by(|a, b| {
            let a_avail = a
                .rate_limit
                .as_ref()
                .map(|rl| rl.available(a.account.rate_limit_weight, now))
                .unwrap_or(a.account.rate_limit_weight);
            let b_avail = b
                .rate_limit
                .as_ref()
                .map(|rl| rl.available(b.account.rate_limit_weight, now))
                .unwrap_or(b.account.rate_limit_weight);
            b_avail
                .cmp(&a_avail)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        });

        let winner = &mut candidates[0];
        winner.account.last_used = Some(now);
        winner.account.updated_at = now;
        Ok(winner.account.clone())
    }

    pub async fn get_balance(&self, account_id: &str) -> Result<Balance, OmsError> {
        let guard = self.accounts.read().await;
        guard
            .get(account_id)
            .map(|r| r.balance.clone())
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))
    }

    pub async fn set_balance(&self, account_id: &str, balance: Balance) -> Result<(), OmsError> {
        let mut guard = self.accounts.write().await;
        let record = guard
            .get_mut(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;
        record.balance = balance;
        Ok(())
    }

    pub async fn get_positions(
        &self,
        account_id: &str,
    ) -> Result<HashMap<String, Decimal>, OmsError> {
        let guard = self.accounts.read().await;
        guard
            .get(account_id)
            .map(|r| r.positions.clone())
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))
    }

    pub async fn set_position(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<(), OmsError> {
        let mut guard = self.accounts.write().await;
        let record = guard
            .get_mut(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;
        record.positions.insert(symbol.to_string(), quantity);
        Ok(())
    }

    pub async fn get_routing_metrics(&self, account_id: &str) -> Result<RoutingMetrics, OmsError> {
        let guard = self.accounts.read().await;
        guard
            .get(account_id)
            .map(|r| r.routing_metrics.clone())
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))
    }

    pub async fn set_routing_metrics(
        &self,
        account_id: &str,
        metrics: RoutingMetrics,
    ) -> Result<(), OmsError> {
        let mut guard = self.accounts.write().await;
        let record = guard
            .get_mut(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;
        record.routing_metrics = metrics;
        Ok(())
    }

    /// Sliding-window rate-limit bookkeeping (spec.md §4.1.2).
    pub async fn update_rate_limit(
        &self,
        account_id: &str,
        added_weight: i64,
    ) -> Result<i64, OmsError> {
        let now = self.clock.now();
        let mut guard = self.accounts.write().await;
        let record = guard
            .get_mut(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;

        let rate_limit = record
            .rate_limit
            .get_or_insert_with(|| RateLimitInfo::new(now));
        rate_limit.charge(added_weight, now);
        debug!(account_id, used = rate_limit.used_weight, "charged rate limit");
        Ok(rate_limit.available(record.account.rate_limit_weight, now))
    }

    pub async fn available_rate_limit(&self, account_id: &str) -> Result<i64, OmsError> {
        let now = self.clock.now();
        let guard = self.accounts.read().await;
        let record = guard
            .get(account_id)
            .ok_or_else(|| OmsError::NotFound(account_id.to_string()))?;
        Ok(record
            .rate_limit
            .as_ref()
            .map(|rl| rl.available(record.account.rate_limit_weight, now))
            .unwrap_or(record.account.rate_limit_weight))
    }
}
