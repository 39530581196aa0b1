//! Configuration surface (spec.md §6), shaped like the teacher's
//! `Config`/`load_or_default`/`validate` tree.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub transfer: TransferConfig,
    pub routing: RoutingConfig,
    pub execution: ExecutionConfig,
    pub arbitrage: ArbitrageConfig,
    pub market_maker: MarketMakerConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategyKind {
    LeastUsed,
    RoundRobin,
    BestFit,
    LowestLatency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub snapshot_interval_secs: u64,
    pub snapshot_dir: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 60,
            snapshot_dir: "./data/accounts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietPeriod {
    /// "HH:MM" local time.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub single_limit: Decimal,
    pub daily_limit: Decimal,
    pub quiet_period: Option<QuietPeriod>,
    pub transfer_worker_interval_secs: u64,
    pub rebalance_worker_interval_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            single_limit: dec!(50000),
            daily_limit: dec!(200000),
            quiet_period: None,
            transfer_worker_interval_secs: 5,
            rebalance_worker_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub strategy: SelectionStrategyKind,
    pub rate_limit_buffer: i64,
    pub rotation_cooldown_secs: i64,
    pub max_retry_attempts: u32,
    pub retry_wait_ms: u64,
    pub metrics_retention_secs: i64,
    pub large_order_threshold: Decimal,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategyKind::LeastUsed,
            rate_limit_buffer: 200,
            rotation_cooldown_secs: 300,
            max_retry_attempts: 3,
            retry_wait_ms: 100,
            metrics_retention_secs: 24 * 3600,
            large_order_threshold: dec!(50000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_concurrent_orders: usize,
    pub worker_pool_size: usize,
    pub order_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub monitoring_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_orders: 100,
            worker_pool_size: 20,
            order_timeout_secs: 30,
            execution_timeout_secs: 5 * 60,
            max_retries: 3,
            retry_delay_ms: 1_000,
            monitoring_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageConfig {
    pub min_profit_rate: Decimal,
    pub min_profit_amount: Decimal,
    pub opportunity_ttl_ms: i64,
    pub max_concurrent_opps: usize,
    pub max_position_size: Decimal,
    pub taker_fees: HashMap<String, Decimal>,
    pub cleanup_interval_ms: u64,
    pub rescan_interval_ms: u64,
    pub max_concurrent_executions: usize,
    pub max_daily_volume: Decimal,
    pub max_consecutive_failures: u32,
    pub max_daily_loss: Decimal,
    pub partial_fill_timeout_secs: u64,
    pub rollback_timeout_secs: u64,
    pub slippage_tolerance: Decimal,
    pub auto_rollback: bool,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        let mut taker_fees = HashMap::new();
        taker_fees.insert("default".to_string(), dec!(0.001));
        Self {
            min_profit_rate: dec!(0.001),
            min_profit_amount: dec!(10),
            opportunity_ttl_ms: 500,
            max_concurrent_opps: 10,
            max_position_size: dec!(100000),
            taker_fees,
            cleanup_interval_ms: 100,
            rescan_interval_ms: 250,
            max_concurrent_executions: 5,
            max_daily_volume: dec!(1000000),
            max_consecutive_failures: 5,
            max_daily_loss: dec!(5000),
            partial_fill_timeout_secs: 2,
            rollback_timeout_secs: 5,
            slippage_tolerance: dec!(0.001),
            auto_rollback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMakerConfig {
    pub refresh_rate_ms: i64,
    pub quote_levels: u32,
    pub level_spacing_bps: Decimal,
    pub max_inventory: Decimal,
    pub inventory_skew: Decimal,
    pub max_position_value: Decimal,
    pub stop_loss_percent: Decimal,
    pub max_daily_loss: Decimal,
    pub base_spread_bps: Decimal,
    pub min_spread_bps: Decimal,
    pub max_spread_bps: Decimal,
    pub min_volatility: Decimal,
    pub reference_depth: Decimal,
    pub quote_size: Decimal,
    pub tick_size: Decimal,
    pub hedge_enabled: bool,
    pub hedge_ratio: Decimal,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 250,
            quote_levels: 3,
            level_spacing_bps: dec!(2),
            max_inventory: dec!(1),
            inventory_skew: dec!(1),
            max_position_value: dec!(100000),
            stop_loss_percent: dec!(0.02),
            max_daily_loss: dec!(2000),
            base_spread_bps: dec!(10),
            min_spread_bps: dec!(5),
            max_spread_bps: dec!(50),
            min_volatility: dec!(0.01),
            reference_depth: dec!(50000),
            quote_size: dec!(0.1),
            tick_size: dec!(0.01),
            hedge_enabled: true,
            hedge_ratio: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_concurrent_strategies: usize,
    pub min_per_strategy: Decimal,
    pub max_per_strategy: Decimal,
    pub max_consecutive_losses: u32,
    pub max_daily_loss: Decimal,
    pub drawdown_threshold: Decimal,
    pub monitor_interval_secs: u64,
    pub scheduler_interval_secs: u64,
    pub rebalance_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_strategies: 10,
            min_per_strategy: dec!(100),
            max_per_strategy: dec!(50000),
            max_consecutive_losses: 5,
            max_daily_loss: dec!(5000),
            drawdown_threshold: dec!(0.2),
            monitor_interval_secs: 5,
            scheduler_interval_secs: 60,
            rebalance_interval_secs: 3600,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            transfer: TransferConfig::default(),
            routing: RoutingConfig::default(),
            execution: ExecutionConfig::default(),
            arbitrage: ArbitrageConfig::default(),
            market_maker: MarketMakerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (`.env` file) with
    /// defaults, following the teacher's `Config::load_or_default` shape.
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("OMS_SNAPSHOT_DIR") {
            config.registry.snapshot_dir = dir;
        }
        if let Ok(v) = std::env::var("OMS_SNAPSHOT_INTERVAL_SECS") {
            if let Ok(parsed) = v.parse() {
                config.registry.snapshot_interval_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("OMS_MAX_CONCURRENT_STRATEGIES") {
            if let Ok(parsed) = v.parse() {
                config.orchestrator.max_concurrent_strategies = parsed;
            }
        }

        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.execution.max_concurrent_orders > 0,
            "execution.max_concurrent_orders must be > 0"
        );
        anyhow::ensure!(
            self.execution.worker_pool_size > 0,
            "execution.worker_pool_size must be > 0"
        );
        anyhow::ensure!(
            self.market_maker.min_spread_bps <= self.market_maker.max_spread_bps,
            "market_maker.min_spread_bps must be <= max_spread_bps"
        );
        anyhow::ensure!(
            self.orchestrator.min_per_strategy <= self.orchestrator.max_per_strategy,
            "orchestrator.min_per_strategy must be <= max_per_strategy"
        );
        Ok(())
    }
}
