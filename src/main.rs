#![allow(dead_code)]

mod adapter;
mod arbitrage;
mod clock;
mod config;
mod decimal;
mod error;
mod execution;
mod ids;
mod marketmaker;
mod models;
mod orchestrator;
mod registry;
mod router;
mod transfer;

use crate::adapter::NullEventSink;
use crate::arbitrage::{ArbitrageDetector, ArbitrageExecutor, ExecutionMode};
use crate::clock::system_clock;
use crate::config::Config;
use crate::execution::ExecutionEngine;
use crate::orchestrator::{RebalanceMode, StrategyOrchestrator};
use crate::registry::snapshot::FileSnapshotStore;
use crate::registry::{spawn_snapshot_loop, AccountRegistry};
use crate::router::AccountRouter;
use crate::transfer::TransferManager;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("==================================================");
    info!("  OMS Core — multi-account, multi-exchange control plane");
    info!("==================================================");

    let config = Config::load_or_default();
    if let Err(e) = config.validate() {
        error!("config validation failed: {e}");
        return Err(e);
    }

    let clock = system_clock();
    let event_sink = Arc::new(NullEventSink);

    // Shutdown signal, `watch`-based per the execution engine's cancellation
    // idiom (see execution::engine).
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // === Account registry ===
    let snapshot_store = Arc::new(FileSnapshotStore::new(config.registry.snapshot_dir.clone()));
    let registry = Arc::new(AccountRegistry::new(snapshot_store, clock.clone()));
    if let Err(e) = registry.restore().await {
        warn!("failed to restore account snapshot: {e}, starting from empty state");
    }

    // No real exchange adapters are wired in this control plane: connectivity
    // is out of scope, so the adapter map starts empty and is populated by
    // whatever binary embeds this crate in production.
    let adapters: HashMap<String, Arc<dyn adapter::ExchangeAdapter>> = HashMap::new();

    // === Router ===
    let router = Arc::new(AccountRouter::new(
        registry.clone(),
        adapters.clone(),
        config.routing.clone(),
        clock.clone(),
    ));

    // === Transfer manager ===
    let now = clock.now();
    let rebalance_rules: Vec<Box<dyn crate::transfer::RebalanceRule>> = vec![
        Box::new(crate::transfer::MaintainMinimumBalance::new(Decimal::from(1000), now)),
        Box::new(crate::transfer::BalanceDistribution::new(now)),
        Box::new(crate::transfer::ConsolidateDust::new(Decimal::from(10), now)),
    ];
    let transfer_manager = Arc::new(TransferManager::new(
        registry.clone(),
        adapters.clone(),
        config.transfer.clone(),
        clock.clone(),
        rebalance_rules,
    ));

    // === Execution engine ===
    // Wired for embedding binaries to drive via `execute()`; this minimal
    // binary has no order source of its own since adapters are out of scope.
    let _execution_engine = Arc::new(ExecutionEngine::new(
        adapters.clone(),
        router.clone(),
        config.execution.clone(),
        clock.clone(),
        event_sink.clone(),
    ));

    // === Arbitrage detector + executor ===
    let (arb_detector, mut arb_opportunities) = ArbitrageDetector::new(config.arbitrage.clone());
    let arb_executor = Arc::new(ArbitrageExecutor::new(
        adapters.clone(),
        router.clone(),
        config.arbitrage.clone(),
        ExecutionMode::Hybrid,
        clock.clone(),
        event_sink.clone(),
    ));

    // === Strategy orchestrator ===
    let orchestrator = Arc::new(StrategyOrchestrator::new(
        config.orchestrator.clone(),
        Decimal::from(1_000_000),
        clock.clone(),
        event_sink.clone(),
    ));

    // === Background loops ===
    spawn_snapshot_loop(
        registry.clone(),
        std::time::Duration::from_secs(config.registry.snapshot_interval_secs),
        shutdown_rx.clone(),
    );

    router
        .clone()
        .spawn_metrics_sweeper(std::time::Duration::from_secs(3600), shutdown_rx.clone());

    transfer_manager.clone().spawn_transfer_worker(
        std::time::Duration::from_secs(config.transfer.transfer_worker_interval_secs),
        shutdown_rx.clone(),
    );
    transfer_manager.clone().spawn_rebalance_worker(
        std::time::Duration::from_secs(config.transfer.rebalance_worker_interval_secs),
        shutdown_rx.clone(),
    );

    arb_detector
        .clone()
        .spawn_cleanup_worker(clock.clone(), shutdown_rx.clone());

    orchestrator.clone().spawn_monitor(shutdown_rx.clone());
    orchestrator
        .clone()
        .spawn_rebalancer(RebalanceMode::RiskAdjusted, shutdown_rx.clone());

    // Consume detected arbitrage opportunities and execute them as they
    // arrive.
    {
        let executor = arb_executor.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    opp = arb_opportunities.recv() => {
                        let Some(opp) = opp else { break };
                        match executor.execute(&opp).await {
                            Ok(result) => info!(id = %result.opportunity_id, status = ?result.status, "arbitrage executed"),
                            Err(e) => warn!(id = %opp.id, error = %e, "arbitrage execution failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { break; }
                    }
                }
            }
        });
    }

    info!("=== OMS core running ===");
    info!("Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, cleaning up...");
    let _ = shutdown_tx.send(true);

    if let Err(e) = registry.snapshot().await {
        error!("final account snapshot failed: {e}");
    }

    info!("OMS core shutdown complete.");
    Ok(())
}
