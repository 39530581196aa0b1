//! Transfer Manager (spec.md §4.2).

use crate::adapter::ExchangeAdapter;
use crate::clock::Clock;
use crate::config::TransferConfig;
use crate::error::OmsError;
use crate::ids::new_uuid;
use crate::models::transfer::{Transfer, TransferRequest, TransferStatus};
use crate::registry::AccountRegistry;
use crate::transfer::rules::RebalanceRule;
use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::collections::HashMap as Map;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

pub struct TransferManager {
    registry: Arc<AccountRegistry>,
    adapters: Map<String, Arc<dyn ExchangeAdapter>>,
    config: TransferConfig,
    clock: Arc<dyn Clock>,
    pending: RwLock<HashMap<String, Transfer>>,
    history: RwLock<Vec<Transfer>>,
    daily_used: RwLock<Decimal>,
    limit_reset_time: RwLock<DateTime<Utc>>,
    rules: Vec<Box<dyn RebalanceRule>>,
}

impl TransferManager {
    pub fn new(
        registry: Arc<AccountRegistry>,
        adapters: Map<String, Arc<dyn ExchangeAdapter>>,
        config: TransferConfig,
        clock: Arc<dyn Clock>,
        rules: Vec<Box<dyn RebalanceRule>>,
    ) -> Self {
        let now = clock.now();
        Self {
            registry,
            adapters,
            config,
            clock,
            pending: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            daily_used: RwLock::new(Decimal::ZERO),
            limit_reset_time: RwLock::new(now + chrono::Duration::hours(24)),
            rules,
        }
    }

    fn in_quiet_period(&self, now: DateTime<Utc>) -> bool {
        let Some(ref quiet) = self.config.quiet_period else {
            return false;
        };
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&quiet.start, "%H:%M"),
            NaiveTime::parse_from_str(&quiet.end, "%H:%M"),
        ) else {
            return false;
        };
        let t = now.time();
        if start <= end {
            t >= start && t <= end
        } else {
            // window wraps midnight
            t >= start || t <= end
        }
    }

    async fn roll_daily_window(&self, now: DateTime<Utc>) {
        let mut reset_time = self.limit_reset_time.write().await;
        if now > *reset_time {
            *reset_time = now + chrono::Duration::hours(24);
            *self.daily_used.write().await = Decimal::ZERO;
        }
    }

    /// Validate and create a pending transfer (spec.md §4.2 `request`).
    pub async fn request(
        &self,
        req: TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<Transfer, OmsError> {
        if self.in_quiet_period(now) {
            return Err(OmsError::Disabled("transfer manager in quiet period".into()));
        }
        if req.amount <= Decimal::ZERO {
            return Err(OmsError::ValidationFailed("amount must be positive".into()));
        }

        let from = self.registry.get(&req.from_account).await?;
        let to = self.registry.get(&req.to_account).await?;
        if from.exchange != to.exchange {
            return Err(OmsError::ValidationFailed(
                "cross-exchange transfers are rejected".into(),
            ));
        }
        if req.amount > self.config.single_limit {
            return Err(OmsError::LimitExceeded(format!(
                "amount {} exceeds single_limit {}",
                req.amount, self.config.single_limit
            )));
        }

        self.roll_daily_window(now).await;
        let daily_used = *self.daily_used.read().await;
        if daily_used + req.amount > self.config.daily_limit {
            return Err(OmsError::LimitExceeded(format!(
                "daily_used {} + amount {} exceeds daily_limit {}",
                daily_used, req.amount, self.config.daily_limit
            )));
        }

        let source_balance = self.registry.get_balance(&req.from_account).await?;
        if source_balance.total_usdt < req.amount {
            return Err(OmsError::InsufficientBalance(format!(
                "source {} has {} < {}",
                req.from_account, source_balance.total_usdt, req.amount
            )));
        }

        let transfer = Transfer {
            id: new_uuid().to_string(),
            from_account: req.from_account,
            to_account: req.to_account,
            asset: req.asset,
            amount: req.amount,
            reason: req.reason,
            status: TransferStatus::Pending,
            requested_at: now,
            completed_at: None,
            error: None,
            exchange_transfer_id: None,
        };

        self.pending
            .write()
            .await
            .insert(transfer.id.clone(), transfer.clone());
        Ok(transfer)
    }

    /// Execute a pending transfer (spec.md §4.2 `execute`).
    ///
    /// Uses compare-and-delete on the pending map so a transfer can never be
    /// executed twice; a second call returns `NotFound`.
    pub async fn execute(&self, transfer_id: &str) -> Result<Transfer, OmsError> {
        let mut transfer = {
            let mut pending = self.pending.write().await;
            pending
                .remove(transfer_id)
                .ok_or_else(|| OmsError::NotFound(transfer_id.to_string()))?
        };

        let from_account = self.registry.get(&transfer.from_account).await?;
        let adapter = self.adapters.get(&from_account.exchange).cloned();
        let now = self.clock.now();

        let outcome = match adapter {
            Some(adapter) => {
                let request = TransferRequest {
                    from_account: transfer.from_account.clone(),
                    to_account: transfer.to_account.clone(),
                    asset: transfer.asset.clone(),
                    amount: transfer.amount,
                    reason: transfer.reason.clone(),
                };
                adapter.transfer_between_accounts(&request).await
            }
            None => Err(OmsError::Unavailable(format!(
                "no adapter registered for exchange {}",
                from_account.exchange
            ))),
        };

        match outcome {
            Ok(exchange_transfer_id) => {
                transfer.status = TransferStatus::Completed;
                transfer.completed_at = Some(now);
                transfer.exchange_transfer_id = Some(exchange_transfer_id);

                let mut from_balance = self.registry.get_balance(&transfer.from_account).await?;
                from_balance.total_usdt -= transfer.amount;
                self.registry
                    .set_balance(&transfer.from_account, from_balance)
                    .await?;

                let mut to_balance = self.registry.get_balance(&transfer.to_account).await?;
                to_balance.total_usdt += transfer.amount;
                self.registry
                    .set_balance(&transfer.to_account, to_balance)
                    .await?;

                *self.daily_used.write().await += transfer.amount;
                info!(id = %transfer.id, amount = %transfer.amount, "transfer completed");
            }
            Err(e) => {
                transfer.status = TransferStatus::Failed;
                transfer.error = Some(e.to_string());
                warn!(id = %transfer.id, error = %e, "transfer failed, source balance unchanged");
            }
        }

        self.history.write().await.push(transfer.clone());
        Ok(transfer)
    }

    pub async fn history(&self) -> Vec<Transfer> {
        self.history.read().await.clone()
    }

    pub async fn get(&self, transfer_id: &str) -> Result<Transfer, OmsError> {
        if let Some(t) = self.pending.read().await.get(transfer_id) {
            return Ok(t.clone());
        }
        self.history
            .read()
            .await
            .iter()
            .find(|t| t.id == transfer_id)
            .cloned()
            .ok_or_else(|| OmsError::NotFound(transfer_id.to_string()))
    }

    /// Apply each enabled rule in priority order; one rule's failure never
    /// aborts the others (spec.md §4.2).
    pub async fn run_rebalancing(&self) {
        let now = self.clock.now();
        let mut rules: Vec<&Box<dyn RebalanceRule>> = self.rules.iter().collect();
        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));

        for rule in rules {
            if !rule.due(now) {
                continue;
            }
            info!(rule = rule.name(), "running rebalance rule");
            if let Err(e) = rule.apply(&self.registry, self, self.clock.as_ref()).await {
                error!(rule = rule.name(), error = %e, "rebalance rule failed, continuing");
            }
            rule.set_next_run(now + rule.schedule().period());
        }
    }

    /// Background transfer worker: sweeps the pending map periodically,
    /// useful if `request` and `execute` are decoupled (spec.md §4.2).
    pub fn spawn_transfer_worker(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ids: Vec<String> = self.pending.read().await.keys().cloned().collect();
                        for id in ids {
                            let _ = self.execute(&id).await;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Background rebalance worker: fires rules whose `next_run` has elapsed.
    pub fn spawn_rebalance_worker(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_rebalancing().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
