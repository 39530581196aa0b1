//! RiskManager (spec.md §4.7): pre-order gating, kill switch, and
//! risk-scale shrinkage for one market-making instance.
//!
//! Grounded directly on the teacher's `risk/risk_manager.rs`: an
//! `AtomicBool` kill switch plus an `RwLock<f64>` size multiplier, checked
//! before every order and recomputed on a periodic cadence.

use crate::config::MarketMakerConfig;
use crate::decimal::clamp;
use crate::marketmaker::inventory::InventoryManager;
use crate::models::order::Side;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{error, warn};

#[derive(Debug, PartialEq)]
pub enum RiskAction {
    Continue,
    ReduceSize(Decimal),
    KillSwitch,
}

pub struct MmRiskManager {
    killed: AtomicBool,
    size_multiplier: RwLock<Decimal>,
    consecutive_losses: RwLock<u32>,
    last_total_pnl: RwLock<Option<Decimal>>,
}

impl MmRiskManager {
    pub fn new() -> Self {
        Self {
            killed: AtomicBool::new(false),
            size_multiplier: RwLock::new(Decimal::ONE),
            consecutive_losses: RwLock::new(0),
            last_total_pnl: RwLock::new(None),
        }
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    pub fn kill(&self) {
        error!("market maker kill switch activated");
        self.killed.store(true, Ordering::Relaxed);
    }

    pub async fn current_size_multiplier(&self) -> Decimal {
        *self.size_multiplier.read().await
    }

    /// Pre-order gate: reject a candidate order while killed, or if it would
    /// push the position past `max_inventory`/`max_position_value`, exceed
    /// `max_order_size`, or the account is already past its daily loss limit.
    pub fn check_pre_order(
        &self,
        inventory: &InventoryManager,
        side: Side,
        qty: Decimal,
        price: Decimal,
        config: &MarketMakerConfig,
    ) -> Result<(), String> {
        if self.is_killed() {
            return Err("kill switch is active".to_string());
        }

        let state = inventory.state();
        let signed_qty = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let new_position = state.position + signed_qty;

        if new_position.abs() > config.max_inventory {
            return Err(format!(
                "new position {new_position} would exceed max inventory {}",
                config.max_inventory
            ));
        }
        if price > Decimal::ZERO && new_position.abs() * price > config.max_position_value {
            return Err(format!(
                "new position value would exceed max {}",
                config.max_position_value
            ));
        }

        let total_pnl = state.realized_pnl + state.unrealized_pnl;
        if total_pnl < -config.max_daily_loss {
            return Err(format!("daily loss {total_pnl} exceeds limit {}", config.max_daily_loss));
        }

        let max_qty = inventory.max_order_size(side, price, config);
        if qty > max_qty {
            return Err(format!("order qty {qty} exceeds max order size {max_qty}"));
        }

        Ok(())
    }

    /// Periodic watchdog: tightens size multiplier or trips the kill switch
    /// as risk deteriorates. Called on the same cadence as quote refresh.
    pub async fn periodic_check(&self, inventory: &InventoryManager, config: &MarketMakerConfig) -> RiskAction {
        let state = inventory.state();
        let total_pnl = state.realized_pnl + state.unrealized_pnl;

        let consecutive_losses = {
            let mut last = self.last_total_pnl.write().await;
            let mut losses = self.consecutive_losses.write().await;
            if let Some(prev) = *last {
                if total_pnl < prev {
                    *losses += 1;
                } else if total_pnl > prev {
                    *losses = 0;
                }
            }
            *last = Some(total_pnl);
            *losses
        };

        if total_pnl < -config.max_daily_loss {
            self.kill();
            return RiskAction::KillSwitch;
        }

        if config.stop_loss_percent > Decimal::ZERO && state.average_price > Decimal::ZERO && state.unrealized_pnl < Decimal::ZERO {
            let basis = state.position.abs() * state.average_price;
            if basis > Decimal::ZERO {
                let drawdown_pct = (-state.unrealized_pnl) / basis;
                if drawdown_pct > config.stop_loss_percent {
                    warn!(drawdown_pct = %drawdown_pct, "market maker stop-loss breached");
                    self.kill();
                    return RiskAction::KillSwitch;
                }
            }
        }

        if consecutive_losses > 5 {
            warn!(consecutive_losses, "market maker consecutive loss limit breached");
            self.kill();
            return RiskAction::KillSwitch;
        }

        let scale = self.risk_scale(total_pnl, consecutive_losses, config);
        *self.size_multiplier.write().await = scale;
        if scale < Decimal::ONE {
            warn!(scale = %scale, consecutive_losses, "market maker risk scale reduced");
            RiskAction::ReduceSize(scale)
        } else {
            RiskAction::Continue
        }
    }

    /// Graduated shrinkage: a proportional cut once `|daily_loss|` passes
    /// half of `max_daily_loss`, further cut by 0.8x at 2+ consecutive
    /// losses and 0.5x at 4+, clamped to `[0.1, 1.0]`.
    fn risk_scale(&self, total_pnl: Decimal, consecutive_losses: u32, config: &MarketMakerConfig) -> Decimal {
        let mut scale = Decimal::ONE;

        if config.max_daily_loss > Decimal::ZERO && total_pnl < Decimal::ZERO {
            let half = config.max_daily_loss * Decimal::new(5, 1);
            if half > Decimal::ZERO && total_pnl.abs() > half {
                let over = ((total_pnl.abs() - half) / half).min(Decimal::ONE);
                scale = Decimal::ONE - over * Decimal::new(5, 1);
            }
        }

        if consecutive_losses >= 2 {
            scale *= Decimal::new(8, 1);
        }
        if consecutive_losses >= 4 {
            scale *= Decimal::new(5, 1);
        }

        clamp(scale, Decimal::new(1, 1), Decimal::ONE)
    }
}

impl Default for MmRiskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn rejects_orders_when_killed() {
        let risk = MmRiskManager::new();
        risk.kill();
        let config = MarketMakerConfig::default();
        let inv = InventoryManager::new(Arc::new(FakeClock::new(Utc::now())));
        assert!(risk.check_pre_order(&inv, Side::Buy, dec!(0.1), dec!(100), &config).is_err());
    }

    #[test]
    fn rejects_when_new_position_exceeds_max_inventory() {
        let risk = MmRiskManager::new();
        let config = MarketMakerConfig {
            max_inventory: dec!(1),
            ..MarketMakerConfig::default()
        };
        let mut inv = InventoryManager::new(Arc::new(FakeClock::new(Utc::now())));
        inv.record_fill(Side::Buy, dec!(0.9), dec!(100), Decimal::ZERO);
        assert!(risk.check_pre_order(&inv, Side::Buy, dec!(0.5), dec!(100), &config).is_err());
    }

    #[test]
    fn rejects_qty_over_max_order_size() {
        let risk = MmRiskManager::new();
        let config = MarketMakerConfig {
            max_inventory: dec!(1),
            max_position_value: dec!(100),
            ..MarketMakerConfig::default()
        };
        let inv = InventoryManager::new(Arc::new(FakeClock::new(Utc::now())));
        // max_order_size(Buy, price=100) = min(limit=1, remaining_value(100)/100=1) = 1
        assert!(risk.check_pre_order(&inv, Side::Buy, dec!(2), dec!(100), &config).is_err());
        assert!(risk.check_pre_order(&inv, Side::Buy, dec!(1), dec!(100), &config).is_ok());
    }

    #[tokio::test]
    async fn periodic_check_trips_kill_switch_on_daily_loss() {
        let risk = MmRiskManager::new();
        let config = MarketMakerConfig::default();
        let mut inv = InventoryManager::new(Arc::new(FakeClock::new(Utc::now())));
        inv.record_fill(Side::Buy, dec!(1), dec!(50000), Decimal::ZERO);
        inv.mark(dec!(50000) - (config.max_daily_loss + dec!(1)));
        let action = risk.periodic_check(&inv, &config).await;
        assert_eq!(action, RiskAction::KillSwitch);
        assert!(risk.is_killed());
    }

    #[tokio::test]
    async fn periodic_check_trips_kill_switch_after_too_many_consecutive_losses() {
        let risk = MmRiskManager::new();
        let config = MarketMakerConfig {
            max_daily_loss: dec!(1000000),
            stop_loss_percent: Decimal::ZERO,
            ..MarketMakerConfig::default()
        };
        let mut inv = InventoryManager::new(Arc::new(FakeClock::new(Utc::now())));
        inv.record_fill(Side::Buy, dec!(1), dec!(100), Decimal::ZERO);

        let mut pnl = Decimal::ZERO;
        for _ in 0..9 {
            pnl -= dec!(10);
            inv.mark(dec!(100) + pnl);
            let action = risk.periodic_check(&inv, &config).await;
            if action == RiskAction::KillSwitch {
                break;
            }
        }
        assert!(risk.is_killed());
    }
}
