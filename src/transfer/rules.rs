//! Scheduled rebalance rules (spec.md §4.2).

use crate::clock::Clock;
use crate::error::OmsError;
use crate::models::account::{AccountFilter, AccountType};
use crate::models::transfer::TransferRequest;
use crate::registry::AccountRegistry;
use crate::transfer::manager::TransferManager;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Hourly,
    Daily,
    Weekly,
}

impl Schedule {
    pub fn period(&self) -> Duration {
        match self {
            Schedule::Hourly => Duration::hours(1),
            Schedule::Daily => Duration::days(1),
            Schedule::Weekly => Duration::weeks(1),
        }
    }
}

#[async_trait]
pub trait RebalanceRule: Send + Sync {
    fn name(&self) -> &str;
    /// Higher runs first.
    fn priority(&self) -> i32;
    fn schedule(&self) -> Schedule;
    fn next_run(&self) -> DateTime<Utc>;
    fn set_next_run(&self, at: DateTime<Utc>);

    fn due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run()
    }

    async fn apply(
        &self,
        registry: &AccountRegistry,
        manager: &TransferManager,
        clock: &dyn Clock,
    ) -> Result<(), OmsError>;
}

fn find_main_account_id(accounts: &[crate::models::account::Account], exchange: &str) -> Option<String> {
    accounts
        .iter()
        .find(|a| a.exchange == exchange && a.account_type == AccountType::Main)
        .map(|a| a.account_id.clone())
}

fn exchanges_of(accounts: &[crate::models::account::Account]) -> Vec<String> {
    let mut seen = Vec::new();
    for account in accounts {
        if !seen.contains(&account.exchange) {
            seen.push(account.exchange.clone());
        }
    }
    seen
}

/// Priority 100: any sub-account below a threshold pulls the deficit from main.
pub struct MaintainMinimumBalance {
    pub threshold: Decimal,
    next_run: Mutex<DateTime<Utc>>,
}

impl MaintainMinimumBalance {
    pub fn new(threshold: Decimal, start: DateTime<Utc>) -> Self {
        Self {
            threshold,
            next_run: Mutex::new(start),
        }
    }
}

#[async_trait]
impl RebalanceRule for MaintainMinimumBalance {
    fn name(&self) -> &str {
        "maintain_minimum_balance"
    }
    fn priority(&self) -> i32 {
        100
    }
    fn schedule(&self) -> Schedule {
        Schedule::Hourly
    }
    fn next_run(&self) -> DateTime<Utc> {
        *self.next_run.lock().unwrap()
    }
    fn set_next_run(&self, at: DateTime<Utc>) {
        *self.next_run.lock().unwrap() = at;
    }

    async fn apply(
        &self,
        registry: &AccountRegistry,
        manager: &TransferManager,
        clock: &dyn Clock,
    ) -> Result<(), OmsError> {
        let all = registry.list(&AccountFilter::default()).await;
        for exchange in exchanges_of(&all) {
            let main_id = match find_main_account_id(&all, &exchange) {
                Some(id) => id,
                None => continue,
            };
            for account in all.iter().filter(|a| {
                a.exchange == exchange && a.account_type == AccountType::Sub && a.active
            }) {
                let balance = registry.get_balance(&account.account_id).await?;
                if balance.total_usdt < self.threshold {
                    let deficit = self.threshold - balance.total_usdt;
                    info!(
                        account = %account.account_id,
                        deficit = %deficit,
                        "maintain_minimum_balance: topping up sub account"
                    );
                    let request = TransferRequest {
                        from_account: main_id.clone(),
                        to_account: account.account_id.clone(),
                        asset: "USDT".to_string(),
                        amount: deficit,
                        reason: "maintain_minimum_balance".to_string(),
                    };
                    match manager.request(request, clock.now()).await {
                        Ok(transfer) => {
                            let _ = manager.execute(&transfer.id).await;
                        }
                        Err(e) => warn!(error = %e, "maintain_minimum_balance: request failed"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Priority 90: if any strategy tag holds > 50% of total sub-account
/// balance on an exchange, diffuse toward equal shares by pulling the
/// excess back to main.
pub struct BalanceDistribution {
    next_run: Mutex<DateTime<Utc>>,
}

impl BalanceDistribution {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            next_run: Mutex::new(start),
        }
    }
}

#[async_trait]
impl RebalanceRule for BalanceDistribution {
    fn name(&self) -> &str {
        "balance_distribution"
    }
    fn priority(&self) -> i32 {
        90
    }
    fn schedule(&self) -> Schedule {
        Schedule::Daily
    }
    fn next_run(&self) -> DateTime<Utc> {
        *self.next_run.lock().unwrap()
    }
    fn set_next_run(&self, at: DateTime<Utc>) {
        *self.next_run.lock().unwrap() = at;
    }

    async fn apply(
        &self,
        registry: &AccountRegistry,
        manager: &TransferManager,
        clock: &dyn Clock,
    ) -> Result<(), OmsError> {
        let all = registry.list(&AccountFilter::default()).await;
        for exchange in exchanges_of(&all) {
            let main_id = match find_main_account_id(&all, &exchange) {
                Some(id) => id,
                None => continue,
            };
            let subs: Vec<_> = all
                .iter()
                .filter(|a| a.exchange == exchange && a.account_type == AccountType::Sub && a.active)
                .collect();
            if subs.is_empty() {
                continue;
            }

            let mut balances: HashMap<String, Decimal> = HashMap::new();
            let mut total = Decimal::ZERO;
            let mut per_strategy: HashMap<String, Decimal> = HashMap::new();
            for account in &subs {
                let balance = registry.get_balance(&account.account_id).await?.total_usdt;
                balances.insert(account.account_id.clone(), balance);
                total += balance;
                if let Some(ref strategy) = account.strategy {
                    *per_strategy.entry(strategy.clone()).or_default() += balance;
                }
            }
            if total.is_zero() {
                continue;
            }

            let overrepresented: Vec<String> = per_strategy
                .iter()
                .filter(|(_, share)| **share > total * Decimal::new(5, 1))
                .map(|(tag, _)| tag.clone())
                .collect();
            if overrepresented.is_empty() {
                continue;
            }

            let equal_share = total / Decimal::from(subs.len() as i64);
            for account in &subs {
                if account.strategy.as_deref().map(|s| overrepresented.contains(&s.to_string())) == Some(true)
                {
                    let balance = balances[&account.account_id];
                    if balance > equal_share {
                        let excess = balance - equal_share;
                        info!(
                            account = %account.account_id,
                            excess = %excess,
                            "balance_distribution: pulling excess back to main"
                        );
                        let request = TransferRequest {
                            from_account: account.account_id.clone(),
                            to_account: main_id.clone(),
                            asset: "USDT".to_string(),
                            amount: excess,
                            reason: "balance_distribution".to_string(),
                        };
                        match manager.request(request, clock.now()).await {
                            Ok(transfer) => {
                                let _ = manager.execute(&transfer.id).await;
                            }
                            Err(e) => warn!(error = %e, "balance_distribution: request failed"),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Priority 80: if more than 3 sub-accounts hold nonzero balances below a
/// dust threshold, sweep them to main.
pub struct ConsolidateDust {
    pub dust_threshold: Decimal,
    next_run: Mutex<DateTime<Utc>>,
}

impl ConsolidateDust {
    pub fn new(dust_threshold: Decimal, start: DateTime<Utc>) -> Self {
        Self {
            dust_threshold,
            next_run: Mutex::new(start),
        }
    }
}

#[async_trait]
impl RebalanceRule for ConsolidateDust {
    fn name(&self) -> &str {
        "consolidate_dust"
    }
    fn priority(&self) -> i32 {
        80
    }
    fn schedule(&self) -> Schedule {
        Schedule::Weekly
    }
    fn next_run(&self) -> DateTime<Utc> {
        *self.next_run.lock().unwrap()
    }
    fn set_next_run(&self, at: DateTime<Utc>) {
        *self.next_run.lock().unwrap() = at;
    }

    async fn apply(
        &self,
        registry: &AccountRegistry,
        manager: &TransferManager,
        clock: &dyn Clock,
    ) -> Result<(), OmsError> {
        let all = registry.list(&AccountFilter::default()).await;
        for exchange in exchanges_of(&all) {
            let main_id = match find_main_account_id(&all, &exchange) {
                Some(id) => id,
                None => continue,
            };
            let mut dust_accounts = Vec::new();
            for account in all
                .iter()
                .filter(|a| a.exchange == exchange && a.account_type == AccountType::Sub && a.active)
            {
                let balance = registry.get_balance(&account.account_id).await?.total_usdt;
                if balance > Decimal::ZERO && balance < self.dust_threshold {
                    dust_accounts.push((account.account_id.clone(), balance));
                }
            }
            if dust_accounts.len() <= 3 {
                continue;
            }
            for (account_id, balance) in dust_accounts {
                info!(account = %account_id, balance = %balance, "consolidate_dust: sweeping to main");
                let request = TransferRequest {
                    from_account: account_id.clone(),
                    to_account: main_id.clone(),
                    asset: "USDT".to_string(),
                    amount: balance,
                    reason: "consolidate_dust".to_string(),
                };
                match manager.request(request, clock.now()).await {
                    Ok(transfer) => {
                        let _ = manager.execute(&transfer.id).await;
                    }
                    Err(e) => warn!(error = %e, "consolidate_dust: request failed"),
                }
            }
        }
        Ok(())
    }
}
