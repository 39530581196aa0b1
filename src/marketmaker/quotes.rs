//! QuoteGenerator (spec.md §4.7): ladder generation and update throttling.
//!
//! Bid/ask spread skew is computed upstream by `SpreadCalculator::bid_ask_skew`;
//! this module only lays out price levels and sizes a side from
//! `InventoryManager::position_limit`, suppressing a side entirely once its
//! limit is exhausted.

use crate::config::MarketMakerConfig;
use crate::decimal::bps_to_rate;
use crate::marketmaker::inventory::InventoryManager;
use crate::models::order::Side;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteLadder {
    pub bids: Vec<QuoteLevel>,
    pub asks: Vec<QuoteLevel>,
}

pub struct QuoteGenerator;

impl QuoteGenerator {
    /// Build a ladder around `mid` using already-skewed `bid_spread_bps`/
    /// `ask_spread_bps`. Per-level size is
    /// `min(config.quote_size, position_limit(side) / quote_levels)`; a side
    /// whose `position_limit` is `<= 0` gets no quotes at all.
    pub fn generate(
        mid: Decimal,
        bid_spread_bps: Decimal,
        ask_spread_bps: Decimal,
        inventory: &InventoryManager,
        config: &MarketMakerConfig,
    ) -> QuoteLadder {
        let levels = Decimal::from(config.quote_levels.max(1));

        let bid_limit = inventory.position_limit(Side::Buy, config.max_inventory);
        let ask_limit = inventory.position_limit(Side::Sell, config.max_inventory);

        let bid_size = if bid_limit > Decimal::ZERO {
            config.quote_size.min(bid_limit / levels)
        } else {
            Decimal::ZERO
        };
        let ask_size = if ask_limit > Decimal::ZERO {
            config.quote_size.min(ask_limit / levels)
        } else {
            Decimal::ZERO
        };

        let mut bids = Vec::new();
        let mut asks = Vec::new();

        for level in 0..config.quote_levels {
            let level_offset_bps = config.level_spacing_bps * Decimal::from(level);

            if bid_size > Decimal::ZERO {
                let bid_rate = bps_to_rate(bid_spread_bps + level_offset_bps);
                let bid_price = Self::round_to_tick(mid * (Decimal::ONE - bid_rate), config.tick_size);
                bids.push(QuoteLevel { price: bid_price, size: bid_size });
            }
            if ask_size > Decimal::ZERO {
                let ask_rate = bps_to_rate(ask_spread_bps + level_offset_bps);
                let ask_price = Self::round_to_tick(mid * (Decimal::ONE + ask_rate), config.tick_size);
                asks.push(QuoteLevel { price: ask_price, size: ask_size });
            }
        }

        QuoteLadder { bids, asks }
    }

    fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
        if tick_size <= Decimal::ZERO {
            return price;
        }
        (price / tick_size).round() * tick_size
    }

    /// True if the new ladder differs from the last placed one by more than
    /// one tick on any level — used to throttle quote replacement.
    pub fn needs_update(previous: Option<&QuoteLadder>, next: &QuoteLadder, tick_size: Decimal) -> bool {
        let Some(prev) = previous else { return true };
        if prev.bids.len() != next.bids.len() || prev.asks.len() != next.asks.len() {
            return true;
        }
        let changed = |a: &[QuoteLevel], b: &[QuoteLevel]| {
            a.iter()
                .zip(b.iter())
                .any(|(x, y)| (x.price - y.price).abs() >= tick_size || x.size != y.size)
        };
        changed(&prev.bids, &next.bids) || changed(&prev.asks, &next.asks)
    }
}
