//! Strategy Orchestrator (spec.md §4.8): lifecycle, capital allocation, risk
//! monitoring, and time-of-day scheduling for strategy instances.

pub mod capital;
pub mod risk_monitor;
pub mod scheduler;

pub use capital::{CapitalAllocator, RebalanceMode};
pub use risk_monitor::{RiskMonitor, RiskVerdict};
pub use scheduler::{ScheduleTransition, ScheduledStrategy, Scheduler};

use crate::adapter::{publish_json, EventSink};
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::error::OmsError;
use crate::ids::new_uuid;
use crate::models::strategy::{StrategyInstance, StrategyMetrics, StrategyStatus, StrategyType};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

pub struct StrategyOrchestrator {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    allocator: CapitalAllocator,
    risk_monitor: RiskMonitor,
    scheduler: RwLock<Scheduler>,
    instances: RwLock<HashMap<String, StrategyInstance>>,
}

#[derive(Debug, Serialize)]
struct StrategyEvent<'a> {
    strategy_id: &'a str,
    strategy_type: StrategyType,
    status: StrategyStatus,
}

impl StrategyOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        total_capital: Decimal,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let allocator = CapitalAllocator::new(total_capital, config.min_per_strategy, config.max_per_strategy);
        let risk_monitor = RiskMonitor::new(
            config.max_daily_loss,
            config.max_consecutive_losses,
            config.drawdown_threshold,
        );
        Self {
            config,
            clock,
            event_sink,
            allocator,
            risk_monitor,
            scheduler: RwLock::new(Scheduler::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    async fn running_count(&self) -> usize {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.status == StrategyStatus::Running)
            .count()
    }

    /// Start a new strategy instance, reserving capital against the
    /// requested account set.
    pub async fn start_strategy(
        &self,
        strategy_type: StrategyType,
        accounts: Vec<String>,
    ) -> Result<String, OmsError> {
        if self.running_count().await >= self.config.max_concurrent_strategies {
            return Err(OmsError::LimitExceeded(
                "max_concurrent_strategies reached".to_string(),
            ));
        }

        let id = new_uuid().to_string();
        let reserved = self
            .allocator
            .reserve(&id, strategy_type, accounts.len())
            .await
            .ok_or_else(|| OmsError::InsufficientBalance("no capital available to start strategy".to_string()))?;

        let now = self.clock.now();
        let instance = StrategyInstance {
            id: id.clone(),
            strategy_type,
            status: StrategyStatus::Running,
            started_at: now,
            stopped_at: None,
            accounts,
            allocated_capital: reserved,
            metrics: StrategyMetrics::default(),
            error_message: None,
        };
        self.instances.write().await.insert(id.clone(), instance);
        info!(strategy_id = %id, ?strategy_type, allocated = %reserved, "strategy started");
        self.publish(&id, strategy_type, StrategyStatus::Running).await;
        Ok(id)
    }

    pub async fn stop_strategy(&self, strategy_id: &str) -> Result<(), OmsError> {
        self.stop_strategy_inner(strategy_id, None, None).await
    }

    async fn stop_strategy_inner(
        &self,
        strategy_id: &str,
        override_amount: Option<Decimal>,
        error_message: Option<String>,
    ) -> Result<(), OmsError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(strategy_id)
            .ok_or_else(|| OmsError::NotFound(format!("strategy {strategy_id} not found")))?;
        if instance.status != StrategyStatus::Running && instance.status != StrategyStatus::Paused {
            return Ok(());
        }
        instance.status = if error_message.is_some() {
            StrategyStatus::Error
        } else {
            StrategyStatus::Stopped
        };
        instance.stopped_at = Some(self.clock.now());
        instance.error_message = error_message;
        let strategy_type = instance.strategy_type;
        drop(instances);

        self.allocator.release(strategy_id, override_amount).await;
        info!(strategy_id, "strategy stopped");
        self.publish(strategy_id, strategy_type, StrategyStatus::Stopped).await;
        Ok(())
    }

    pub async fn update_metrics(&self, strategy_id: &str, metrics: StrategyMetrics) {
        if let Some(instance) = self.instances.write().await.get_mut(strategy_id) {
            instance.metrics = metrics;
        }
    }

    pub async fn get(&self, strategy_id: &str) -> Option<StrategyInstance> {
        self.instances.read().await.get(strategy_id).cloned()
    }

    pub async fn list(&self) -> Vec<StrategyInstance> {
        self.instances.read().await.values().cloned().collect()
    }

    pub async fn add_schedule(&self, schedule: ScheduledStrategy) {
        self.scheduler.write().await.add(schedule);
    }

    /// RiskMonitor tick: check every running strategy, kill and stop on trip.
    pub async fn monitor_tick(&self) {
        let running: Vec<(String, StrategyMetrics)> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.status == StrategyStatus::Running)
            .map(|i| (i.id.clone(), i.metrics.clone()))
            .collect();

        for (id, metrics) in running {
            if let RiskVerdict::KillSwitch(reason) = self.risk_monitor.check(&metrics) {
                warn!(strategy_id = %id, reason, "kill switch triggered");
                let _ = self.stop_strategy_inner(&id, None, Some(reason.clone())).await;
                publish_json(
                    self.event_sink.as_ref(),
                    "strategies.orchestrator.kill_switch.triggered",
                    &serde_json::json!({ "strategy_id": id, "reason": reason }),
                )
                .await;
            }
        }
    }

    /// Scheduler tick: start/stop strategies per their active-hour windows.
    /// `spawn` is how a stopped-but-scheduled strategy gets (re)started; the
    /// caller supplies the strategy type/accounts to restart with.
    pub async fn scheduler_tick<F>(&self, now: chrono::DateTime<chrono::Utc>, spawn: F)
    where
        F: Fn(&str) -> (StrategyType, Vec<String>),
    {
        let scheduler = self.scheduler.read().await;
        let instances = self.instances.read().await;
        let transitions = scheduler.tick(now, |id| {
            instances
                .get(id)
                .map(|i| i.status == StrategyStatus::Running)
                .unwrap_or(false)
        });
        drop(instances);
        drop(scheduler);

        for (id, transition) in transitions {
            match transition {
                ScheduleTransition::Start => {
                    let (strategy_type, accounts) = spawn(&id);
                    if let Err(e) = self.start_strategy(strategy_type, accounts).await {
                        warn!(strategy_id = %id, error = %e, "scheduled start failed");
                    }
                }
                ScheduleTransition::Stop => {
                    let _ = self.stop_strategy(&id).await;
                }
            }
        }
    }

    /// Periodic rebalance across running strategies.
    pub async fn rebalance(&self, mode: RebalanceMode) {
        let now = self.clock.now();
        let snapshot: Vec<_> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.status == StrategyStatus::Running)
            .map(|i| (i.id.clone(), i.strategy_type, i.metrics.clone(), i.started_at))
            .collect();
        let allocations = self.allocator.rebalance(mode, &snapshot, now).await;
        let mut instances = self.instances.write().await;
        for allocation in &allocations {
            if let Some(instance) = instances.get_mut(&allocation.strategy_id) {
                instance.allocated_capital = allocation.amount;
            }
        }
        drop(instances);
        publish_json(
            self.event_sink.as_ref(),
            "strategies.orchestrator.rebalance",
            &allocations,
        )
        .await;
    }

    async fn publish(&self, strategy_id: &str, strategy_type: StrategyType, status: StrategyStatus) {
        let subject = match status {
            StrategyStatus::Running => "strategies.orchestrator.strategy.started",
            StrategyStatus::Stopped | StrategyStatus::Error => "strategies.orchestrator.strategy.stopped",
            StrategyStatus::Paused => "strategies.orchestrator.strategy.paused",
        };
        publish_json(
            self.event_sink.as_ref(),
            subject,
            &StrategyEvent {
                strategy_id,
                strategy_type,
                status,
            },
        )
        .await;
    }

    /// Background loop driving `monitor_tick` on `monitor_interval_secs`.
    pub fn spawn_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.monitor_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.monitor_tick().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        })
    }

    /// Background loop driving `rebalance` on `rebalance_interval_secs`.
    pub fn spawn_rebalancer(
        self: Arc<Self>,
        mode: RebalanceMode,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.rebalance_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.rebalance(mode).await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NullEventSink;
    use crate::clock::FakeClock;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn orchestrator() -> StrategyOrchestrator {
        StrategyOrchestrator::new(
            OrchestratorConfig::default(),
            dec!(100000),
            Arc::new(FakeClock::new(Utc::now())),
            Arc::new(NullEventSink),
        )
    }

    #[tokio::test]
    async fn start_reserves_capital_and_lists_instance() {
        let orch = orchestrator();
        let id = orch
            .start_strategy(StrategyType::Arbitrage, vec!["a".to_string()])
            .await
            .unwrap();
        let instance = orch.get(&id).await.unwrap();
        assert_eq!(instance.status, StrategyStatus::Running);
        assert!(instance.allocated_capital > Decimal::ZERO);
    }

    #[tokio::test]
    async fn stop_releases_capital() {
        let orch = orchestrator();
        let id = orch
            .start_strategy(StrategyType::MarketMaking, vec!["a".to_string()])
            .await
            .unwrap();
        orch.stop_strategy(&id).await.unwrap();
        let instance = orch.get(&id).await.unwrap();
        assert_eq!(instance.status, StrategyStatus::Stopped);
    }

    #[tokio::test]
    async fn monitor_tick_kills_strategy_over_daily_loss() {
        let orch = orchestrator();
        let id = orch
            .start_strategy(StrategyType::Arbitrage, vec!["a".to_string()])
            .await
            .unwrap();
        let mut metrics = StrategyMetrics::default();
        metrics.daily_pnl = -(OrchestratorConfig::default().max_daily_loss) - dec!(1);
        orch.update_metrics(&id, metrics).await;
        orch.monitor_tick().await;
        let instance = orch.get(&id).await.unwrap();
        assert_eq!(instance.status, StrategyStatus::Error);
    }

    #[tokio::test]
    async fn respects_max_concurrent_strategies() {
        let config = OrchestratorConfig {
            max_concurrent_strategies: 1,
            ..OrchestratorConfig::default()
        };
        let orch = StrategyOrchestrator::new(
            config,
            dec!(100000),
            Arc::new(FakeClock::new(Utc::now())),
            Arc::new(NullEventSink),
        );
        orch.start_strategy(StrategyType::Arbitrage, vec!["a".to_string()])
            .await
            .unwrap();
        let err = orch
            .start_strategy(StrategyType::MarketMaking, vec!["b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, OmsError::LimitExceeded(_)));
    }
}
