//! SpreadCalculator (spec.md §4.7): volatility-, inventory-, depth-, and
//! flow-adjusted quoting spread.
//!
//! Volatility is the one place this crate touches `f64` — it is a
//! statistical estimate over log-returns, never a monetary value, per
//! spec.md §1's floating-point rule.

use crate::config::MarketMakerConfig;
use crate::decimal::clamp;
use crate::models::order::Side;
use rust_decimal::Decimal;
use std::collections::VecDeque;

const MAX_SAMPLES: usize = 1000;

pub struct SpreadCalculator {
    log_returns: VecDeque<f64>,
    last_mid: Option<Decimal>,
    buy_volume: Decimal,
    sell_volume: Decimal,
}

impl SpreadCalculator {
    pub fn new() -> Self {
        Self {
            log_returns: VecDeque::with_capacity(MAX_SAMPLES),
            last_mid: None,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
        }
    }

    pub fn observe_mid(&mut self, mid: Decimal) {
        if let Some(prev) = self.last_mid {
            if prev > Decimal::ZERO && mid > Decimal::ZERO {
                let ratio = (mid / prev).to_string().parse::<f64>().unwrap_or(1.0);
                if ratio > 0.0 {
                    if self.log_returns.len() >= MAX_SAMPLES {
                        self.log_returns.pop_front();
                    }
                    self.log_returns.push_back(ratio.ln());
                }
            }
        }
        self.last_mid = Some(mid);
    }

    /// Record a fill's side/qty toward the buy/sell flow ratio used by
    /// `flow_adj`.
    pub fn record_trade(&mut self, side: Side, qty: Decimal) {
        match side {
            Side::Buy => self.buy_volume += qty,
            Side::Sell => self.sell_volume += qty,
        }
    }

    /// Sample standard deviation of log-returns; zero until at least two
    /// observations exist.
    pub fn volatility(&self) -> f64 {
        let n = self.log_returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.log_returns.iter().sum::<f64>() / n as f64;
        let variance = self
            .log_returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    }

    fn vol_adj(&self, config: &MarketMakerConfig) -> Decimal {
        let vol = self.volatility();
        if vol <= 0.0 {
            return Decimal::ONE;
        }
        let min_vol = config.min_volatility.to_string().parse::<f64>().unwrap_or(0.0);
        if min_vol <= 0.0 {
            return Decimal::ONE;
        }
        let factor = (1.0 + 0.5 * (vol / min_vol - 1.0)).clamp(0.0, 2.0);
        clamp(Decimal::from_f64_scaled(factor), Decimal::ZERO, Decimal::TWO)
    }

    fn inv_adj(position: Decimal, config: &MarketMakerConfig) -> Decimal {
        if config.max_inventory <= Decimal::ZERO {
            return Decimal::ONE;
        }
        Decimal::ONE + (position / config.max_inventory).abs() * config.inventory_skew
    }

    fn depth_adj(book_depth: Decimal, config: &MarketMakerConfig) -> Decimal {
        let wide = Decimal::new(15, 1);
        if book_depth <= Decimal::ZERO || config.reference_depth <= Decimal::ZERO {
            return wide;
        }
        clamp(Decimal::TWO - book_depth / config.reference_depth, Decimal::new(8, 1), wide)
    }

    fn flow_adj(&self) -> Decimal {
        let total = self.buy_volume + self.sell_volume;
        if total <= Decimal::ZERO {
            return Decimal::ONE;
        }
        let buy_ratio = self.buy_volume / total;
        if buy_ratio > Decimal::new(6, 1) {
            Decimal::ONE + (buy_ratio - Decimal::new(5, 1)) * Decimal::new(5, 1)
        } else if buy_ratio < Decimal::new(4, 1) {
            Decimal::ONE - (Decimal::new(5, 1) - buy_ratio) * Decimal::new(2, 1)
        } else {
            Decimal::ONE
        }
    }

    /// Quoting spread in basis points, clamped to `[min_spread_bps,
    /// max_spread_bps]`: `base * vol_adj * inv_adj * depth_adj * flow_adj`.
    pub fn spread_bps(&self, position: Decimal, book_depth: Decimal, config: &MarketMakerConfig) -> Decimal {
        let factor = self.vol_adj(config) * Self::inv_adj(position, config) * Self::depth_adj(book_depth, config) * self.flow_adj();
        clamp(config.base_spread_bps * factor, config.min_spread_bps, config.max_spread_bps)
    }

    /// Split a symmetric `base` spread into bid/ask spreads biased by
    /// inventory: a long position narrows the bid and widens the ask, each
    /// floored at `min_spread_bps / 2`.
    pub fn bid_ask_skew(base: Decimal, position: Decimal, config: &MarketMakerConfig) -> (Decimal, Decimal) {
        let skew_factor = if config.max_inventory > Decimal::ZERO {
            (position / config.max_inventory) * config.inventory_skew
        } else {
            Decimal::ZERO
        };
        let floor = config.min_spread_bps / Decimal::TWO;
        let bid = (base * (Decimal::ONE - skew_factor)).max(floor);
        let ask = (base * (Decimal::ONE + skew_factor)).max(floor);
        (bid, ask)
    }
}

impl Default for SpreadCalculator {
    fn default() -> Self {
        Self::new()
    }
}

trait FromF64Scaled {
    fn from_f64_scaled(v: f64) -> Decimal;
}

impl FromF64Scaled for Decimal {
    /// Convert a statistical multiplier to `Decimal`, rounding to 6 places;
    /// falls back to 1.0 on NaN/overflow so a bad volatility sample never
    /// poisons the quote spread.
    fn from_f64_scaled(v: f64) -> Decimal {
        Decimal::from_f64_retain(v)
            .map(|d| d.round_dp(6))
            .unwrap_or(Decimal::ONE)
    }
}
