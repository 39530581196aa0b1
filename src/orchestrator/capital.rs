//! CapitalAllocator (spec.md §4.8): reserves and rebalances capital across
//! running strategy instances.

use crate::decimal::clamp;
use crate::models::strategy::{CapitalAllocation, StrategyMetrics, StrategyType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceMode {
    Equal,
    RiskAdjusted,
}

struct Reservation {
    amount: Decimal,
}

pub struct CapitalAllocator {
    total_capital: RwLock<Decimal>,
    reservations: RwLock<HashMap<String, Reservation>>,
    min_per_strategy: Decimal,
    max_per_strategy: Decimal,
}

impl CapitalAllocator {
    pub fn new(total_capital: Decimal, min_per_strategy: Decimal, max_per_strategy: Decimal) -> Self {
        Self {
            total_capital: RwLock::new(total_capital),
            reservations: RwLock::new(HashMap::new()),
            min_per_strategy,
            max_per_strategy,
        }
    }

    pub async fn available(&self) -> Decimal {
        let total = *self.total_capital.read().await;
        let reserved: Decimal = self.reservations.read().await.values().map(|r| r.amount).sum();
        total - reserved
    }

    /// Reserve capital for a new strategy start. Returns the reserved amount,
    /// or `None` if `available` cannot cover even the minimum.
    pub async fn reserve(
        &self,
        strategy_id: &str,
        strategy_type: StrategyType,
        account_count: usize,
    ) -> Option<Decimal> {
        let base = strategy_type.base_allocation_fraction() * self.max_per_strategy;
        let account_multiplier = clamp(
            Decimal::new(3, 1) * Decimal::from(account_count as u64) + Decimal::new(7, 1),
            Decimal::new(7, 1),
            dec!(2.0),
        );
        let mut amount = clamp(base * account_multiplier, self.min_per_strategy, self.max_per_strategy);

        let available = self.available().await;
        if available < self.min_per_strategy {
            return None;
        }
        if amount > available {
            amount = available;
        }

        self.reservations
            .write()
            .await
            .insert(strategy_id.to_string(), Reservation { amount });
        Some(amount)
    }

    /// Release the reservation for a stopped strategy, returning the amount
    /// released (either the original reservation or a caller-supplied
    /// override, e.g. after losses reduced the working capital).
    pub async fn release(&self, strategy_id: &str, override_amount: Option<Decimal>) -> Decimal {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations.remove(strategy_id);
        override_amount.unwrap_or_else(|| reservation.map(|r| r.amount).unwrap_or(Decimal::ZERO))
    }

    /// Recompute every running strategy's allocation. Equal split divides
    /// `total_capital` evenly; risk-adjusted weights by a performance score.
    pub async fn rebalance(
        &self,
        mode: RebalanceMode,
        strategies: &[(String, StrategyType, StrategyMetrics, DateTime<Utc>)],
        now: DateTime<Utc>,
    ) -> Vec<CapitalAllocation> {
        if strategies.is_empty() {
            return Vec::new();
        }
        let total = *self.total_capital.read().await;

        let weights: Vec<Decimal> = match mode {
            RebalanceMode::Equal => strategies.iter().map(|_| Decimal::ONE).collect(),
            RebalanceMode::RiskAdjusted => strategies
                .iter()
                .map(|(_, strategy_type, metrics, started_at)| {
                    Self::risk_score(strategy_type, metrics, started_at, now)
                })
                .collect(),
        };
        let weight_sum: Decimal = weights.iter().sum();

        let mut allocations = Vec::with_capacity(strategies.len());
        let mut reservations = self.reservations.write().await;
        for ((id, _, _, _), weight) in strategies.iter().zip(weights.iter()) {
            let share = if weight_sum > Decimal::ZERO {
                total * (*weight / weight_sum)
            } else {
                total / Decimal::from(strategies.len() as u64)
            };
            let amount = clamp(share, self.min_per_strategy, self.max_per_strategy);
            let percentage = if total > Decimal::ZERO {
                amount / total
            } else {
                Decimal::ZERO
            };
            reservations.insert(id.clone(), Reservation { amount });
            allocations.push(CapitalAllocation {
                strategy_id: id.clone(),
                amount,
                percentage,
                updated_at: now,
            });
        }
        allocations
    }

    fn risk_score(
        strategy_type: &StrategyType,
        metrics: &StrategyMetrics,
        started_at: &DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Decimal {
        let age_days = (now - *started_at).num_days();
        let age_factor = if age_days < 7 { Decimal::new(5, 1) } else { Decimal::ONE };
        let type_bonus = match strategy_type {
            StrategyType::Arbitrage => Decimal::new(11, 1),
            StrategyType::MarketMaking => Decimal::ONE,
        };
        let score = Decimal::ONE
            * (Decimal::ONE + Decimal::new(5, 1) * metrics.sharpe)
            * (Decimal::new(5, 1) + metrics.win_rate)
            * (Decimal::ONE - Decimal::new(5, 1) * metrics.max_drawdown)
            * age_factor
            * type_bonus;
        score.max(Decimal::new(1, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_clamps_to_min_and_max() {
        let allocator = CapitalAllocator::new(dec!(100000), dec!(100), dec!(50000));
        let amount = allocator
            .reserve("s1", StrategyType::Arbitrage, 2)
            .await
            .unwrap();
        assert!(amount >= dec!(100) && amount <= dec!(50000));
    }

    #[tokio::test]
    async fn release_returns_override_when_supplied() {
        let allocator = CapitalAllocator::new(dec!(100000), dec!(100), dec!(50000));
        allocator.reserve("s1", StrategyType::MarketMaking, 1).await.unwrap();
        let returned = allocator.release("s1", Some(dec!(500))).await;
        assert_eq!(returned, dec!(500));
        assert_eq!(allocator.available().await, dec!(100000));
    }

    #[tokio::test]
    async fn reserve_fails_when_capital_exhausted() {
        let allocator = CapitalAllocator::new(dec!(50), dec!(100), dec!(50000));
        let result = allocator.reserve("s1", StrategyType::Arbitrage, 1).await;
        assert!(result.is_none());
    }
}
