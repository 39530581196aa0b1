//! StrategyInstance and CapitalAllocation (spec.md §3, §4.8).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    Arbitrage,
    MarketMaking,
}

impl StrategyType {
    /// Per-type base allocation fraction of `max_per_strategy` (spec.md §4.8).
    pub fn base_allocation_fraction(&self) -> Decimal {
        match self {
            StrategyType::Arbitrage => Decimal::new(8, 1),
            StrategyType::MarketMaking => Decimal::new(6, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Running,
    Stopped,
    Paused,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub consecutive_losses: u32,
    pub max_drawdown: Decimal,
    pub sharpe: Decimal,
    pub win_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInstance {
    pub id: String,
    pub strategy_type: StrategyType,
    pub status: StrategyStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub accounts: Vec<String>,
    pub allocated_capital: Decimal,
    pub metrics: StrategyMetrics,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalAllocation {
    pub strategy_id: String,
    pub amount: Decimal,
    pub percentage: Decimal,
    pub updated_at: DateTime<Utc>,
}
