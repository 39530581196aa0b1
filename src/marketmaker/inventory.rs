//! InventoryManager (spec.md §4.7): tracks net position and average entry
//! price for one market-making instance.
//!
//! Average-in formula reused directly from the teacher's
//! `risk/position_manager.rs::record_fill` (weighted average on buys,
//! realized P&L on sells).

use crate::clock::Clock;
use crate::config::MarketMakerConfig;
use crate::models::inventory::InventoryState;
use crate::models::order::Side;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

pub struct InventoryManager {
    state: InventoryState,
    clock: Arc<dyn Clock>,
}

impl InventoryManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: InventoryState::flat(clock.now()),
            clock,
        }
    }

    pub fn state(&self) -> &InventoryState {
        &self.state
    }

    /// Apply a fill, averaging in on same-direction adds and realizing P&L
    /// on reductions, same as the teacher's position-manager average-in rule.
    pub fn record_fill(&mut self, side: Side, qty: Decimal, price: Decimal, fee: Decimal) {
        let now = self.clock.now();
        let signed_qty = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };

        let same_direction = self.state.position == Decimal::ZERO
            || (self.state.position > Decimal::ZERO) == (signed_qty > Decimal::ZERO);

        if same_direction {
            let total_cost = self.state.average_price * self.state.position.abs() + price * qty;
            let new_abs = self.state.position.abs() + qty;
            self.state.position += signed_qty;
            if new_abs > Decimal::ZERO {
                self.state.average_price = total_cost / new_abs;
            }
        } else {
            let closing_qty = qty.min(self.state.position.abs());
            let pnl = match side {
                Side::Sell => (price - self.state.average_price) * closing_qty,
                Side::Buy => (self.state.average_price - price) * closing_qty,
            };
            self.state.realized_pnl += pnl - fee;
            self.state.position += signed_qty;

            // Position flipped sign: remaining qty opens a fresh position.
            if qty > closing_qty {
                let remainder = qty - closing_qty;
                self.state.average_price = price;
                self.state.position = match side {
                    Side::Buy => remainder,
                    Side::Sell => -remainder,
                };
            } else if self.state.position == Decimal::ZERO {
                self.state.average_price = Decimal::ZERO;
            }
        }

        self.state.last_update = now;
        info!(
            position = %self.state.position,
            average_price = %self.state.average_price,
            realized_pnl = %self.state.realized_pnl,
            "inventory updated"
        );
    }

    pub fn mark(&mut self, mark_price: Decimal) {
        self.state.unrealized_pnl = (mark_price - self.state.average_price) * self.state.position;
        self.state.last_update = self.clock.now();
    }

    /// Fraction of `max_inventory` currently used, signed.
    pub fn skew_ratio(&self, max_inventory: Decimal) -> Decimal {
        if max_inventory <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.state.position / max_inventory
    }

    /// Remaining room to add on `side` before `max_inventory` is hit, treating
    /// `max_inventory` as symmetric (`max_long == max_short == max_inventory`).
    /// Negative once the position is already past the bound on that side.
    pub fn position_limit(&self, side: Side, max_inventory: Decimal) -> Decimal {
        match side {
            Side::Buy => max_inventory - self.state.position,
            Side::Sell => self.state.position + max_inventory,
        }
    }

    /// Signed size adjustment that leans quoting away from the side already
    /// overweight, used as the additive skew term on quote size.
    pub fn skew_adjustment(&self, max_inventory: Decimal, inventory_skew: Decimal) -> Decimal {
        if max_inventory <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        -(self.state.position / max_inventory) * inventory_skew
    }

    /// Largest order size allowed on `side` at `price`: bounded by remaining
    /// position-limit room and by remaining notional room under
    /// `max_position_value`.
    pub fn max_order_size(&self, side: Side, price: Decimal, config: &MarketMakerConfig) -> Decimal {
        let limit = self.position_limit(side, config.max_inventory);
        if limit <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if price <= Decimal::ZERO {
            return limit;
        }
        let remaining_value = config.max_position_value - self.state.position.abs() * price;
        if remaining_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        limit.min(remaining_value / price)
    }

    /// `Some(hedge_qty)` once the position exceeds 70% of `max_inventory` and
    /// hedging is enabled, `None` otherwise.
    pub fn should_hedge(&self, config: &MarketMakerConfig) -> Option<Decimal> {
        if !config.hedge_enabled || config.max_inventory <= Decimal::ZERO {
            return None;
        }
        let threshold = config.max_inventory * Decimal::new(7, 1);
        if self.state.position.abs() > threshold {
            Some(self.state.position * config.hedge_ratio)
        } else {
            None
        }
    }
}
