//! RiskMonitor (spec.md §4.8): trips the kill-switch on a running
//! strategy's own metrics.

use crate::models::strategy::StrategyMetrics;
use rust_decimal::Decimal;

#[derive(Debug, PartialEq)]
pub enum RiskVerdict {
    Ok,
    KillSwitch(String),
}

pub struct RiskMonitor {
    max_daily_loss: Decimal,
    max_consecutive_losses: u32,
    drawdown_threshold: Decimal,
}

impl RiskMonitor {
    pub fn new(max_daily_loss: Decimal, max_consecutive_losses: u32, drawdown_threshold: Decimal) -> Self {
        Self {
            max_daily_loss,
            max_consecutive_losses,
            drawdown_threshold,
        }
    }

    pub fn check(&self, metrics: &StrategyMetrics) -> RiskVerdict {
        if metrics.daily_pnl < -self.max_daily_loss {
            return RiskVerdict::KillSwitch(format!(
                "daily pnl {} below -{}",
                metrics.daily_pnl, self.max_daily_loss
            ));
        }
        if metrics.consecutive_losses > self.max_consecutive_losses {
            return RiskVerdict::KillSwitch(format!(
                "{} consecutive losses exceeds {}",
                metrics.consecutive_losses, self.max_consecutive_losses
            ));
        }
        if metrics.max_drawdown > self.drawdown_threshold {
            return RiskVerdict::KillSwitch(format!(
                "max drawdown {} exceeds threshold {}",
                metrics.max_drawdown, self.drawdown_threshold
            ));
        }
        RiskVerdict::Ok
    }
}
