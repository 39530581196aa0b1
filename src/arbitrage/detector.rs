//! Arbitrage Detector (spec.md §4.5): O(1) per-update cross-exchange scan.
//!
//! Grounded on the teacher's `signals/arb_scanner.rs` (best-bid/best-ask
//! comparison, edge/profit thresholding run on every order-book update) and
//! `execution/fill_tracker.rs` for the `DashMap` hot-path store shape.

use crate::config::ArbitrageConfig;
use crate::decimal::clamp;
use crate::ids::new_uuid;
use crate::models::arbitrage::{ArbitrageOpportunity, OpportunityStatus, PriceFeed};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Keyed by `(exchange, symbol)`. A `DashMap` instead of the registries'
/// single `RwLock` because this is the one latency-sensitive hot path spec.md
/// §5 calls out: concurrent per-key writes from market-data callbacks.
pub struct ArbitrageDetector {
    feeds: DashMap<(String, String), PriceFeed>,
    config: ArbitrageConfig,
    opportunities_tx: mpsc::Sender<ArbitrageOpportunity>,
}

impl ArbitrageDetector {
    pub fn new(config: ArbitrageConfig) -> (Arc<Self>, mpsc::Receiver<ArbitrageOpportunity>) {
        let (tx, rx) = mpsc::channel(100);
        (
            Arc::new(Self {
                feeds: DashMap::new(),
                config,
                opportunities_tx: tx,
            }),
            rx,
        )
    }

    pub fn taker_fee(&self, exchange: &str) -> Decimal {
        self.config
            .taker_fees
            .get(exchange)
            .copied()
            .unwrap_or_else(|| {
                self.config
                    .taker_fees
                    .get("default")
                    .copied()
                    .unwrap_or(Decimal::ZERO)
            })
    }

    /// Ingest a fresh top-of-book quote and scan for arbitrage against every
    /// other known venue quoting the same symbol. O(N) in the number of
    /// venues, O(1) per pair.
    pub async fn on_price_update(&self, exchange: &str, symbol: &str, feed: PriceFeed) {
        self.feeds
            .insert((exchange.to_string(), symbol.to_string()), feed.clone());

        let now = feed.last_update;
        let others: Vec<(String, PriceFeed)> = self
            .feeds
            .iter()
            .filter(|entry| entry.key().1 == symbol && entry.key().0 != exchange)
            .map(|entry| (entry.key().0.clone(), entry.value().clone()))
            .collect();

        for (other_exchange, other_feed) in others {
            if other_feed.is_stale(now) {
                continue;
            }
            if let Some(opp) = self.scan_pair(symbol, exchange, &feed, &other_exchange, &other_feed, now) {
                self.emit(opp).await;
            }
            if let Some(opp) = self.scan_pair(symbol, &other_exchange, &other_feed, exchange, &feed, now) {
                self.emit(opp).await;
            }
        }
    }

    /// Check buying on `buy_exchange` (at its ask) and selling on
    /// `sell_exchange` (at its bid).
    fn scan_pair(
        &self,
        symbol: &str,
        buy_exchange: &str,
        buy_feed: &PriceFeed,
        sell_exchange: &str,
        sell_feed: &PriceFeed,
        now: DateTime<Utc>,
    ) -> Option<ArbitrageOpportunity> {
        if buy_feed.ask <= Decimal::ZERO || sell_feed.bid <= Decimal::ZERO {
            return None;
        }
        if sell_feed.bid <= buy_feed.ask {
            return None;
        }

        let buy_fee = self.taker_fee(buy_exchange);
        let sell_fee = self.taker_fee(sell_exchange);

        let gross_spread = sell_feed.bid - buy_feed.ask;
        let rate = gross_spread / buy_feed.ask;
        // Strict inequality: a spread exactly at the threshold is rejected.
        if rate <= self.config.min_profit_rate {
            return None;
        }

        let max_qty = buy_feed
            .ask_qty
            .min(sell_feed.bid_qty)
            .min(self.config.max_position_size / buy_feed.ask);
        if max_qty <= Decimal::ZERO {
            return None;
        }

        let buy_cost = buy_feed.ask * max_qty;
        let sell_proceeds = sell_feed.bid * max_qty;
        let fees = buy_cost * buy_fee + sell_proceeds * sell_fee;
        let net_profit = sell_proceeds - buy_cost - fees;

        if net_profit < self.config.min_profit_amount {
            return None;
        }

        let confidence = clamp(rate * Decimal::from(1000), Decimal::ZERO, Decimal::from(100));

        Some(ArbitrageOpportunity {
            id: new_uuid().to_string(),
            symbol: symbol.to_string(),
            buy_exchange: buy_exchange.to_string(),
            sell_exchange: sell_exchange.to_string(),
            buy_price: buy_feed.ask,
            sell_price: sell_feed.bid,
            max_qty,
            buy_fee,
            sell_fee,
            net_profit,
            detected_at: now,
            valid_until: now + chrono::Duration::milliseconds(self.config.opportunity_ttl_ms),
            status: OpportunityStatus::Detected,
            confidence,
        })
    }

    async fn emit(&self, opportunity: ArbitrageOpportunity) {
        match self.opportunities_tx.try_send(opportunity) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(opp)) => {
                warn!(symbol = %opp.symbol, "opportunity channel full, dropping detection");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("opportunity channel closed, detector has no consumer");
            }
        }
    }

    /// Drop feeds that have gone stale (spec.md §4.5 cleanup worker).
    pub fn cleanup_stale(&self, now: DateTime<Utc>) {
        self.feeds.retain(|_, feed| !feed.is_stale(now));
    }

    pub fn spawn_cleanup_worker(
        self: Arc<Self>,
        clock: Arc<dyn crate::clock::Clock>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_millis(self.config.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cleanup_stale(clock.now());
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn feed(bid: Decimal, ask: Decimal, now: DateTime<Utc>) -> PriceFeed {
        PriceFeed {
            bid,
            bid_qty: dec!(10),
            ask,
            ask_qty: dec!(10),
            last_update: now,
        }
    }

    #[tokio::test]
    async fn detects_cross_exchange_arb() {
        let (detector, mut rx) = ArbitrageDetector::new(ArbitrageConfig::default());
        let now = Utc::now();

        detector
            .on_price_update("binance", "BTCUSDT", feed(dec!(49900), dec!(49950), now))
            .await;
        detector
            .on_price_update("okx", "BTCUSDT", feed(dec!(50200), dec!(50250), now))
            .await;

        let opp = rx.try_recv().expect("expected an opportunity");
        assert_eq!(opp.buy_exchange, "binance");
        assert_eq!(opp.sell_exchange, "okx");
        assert!(opp.net_profit > Decimal::ZERO);
    }

    #[tokio::test]
    async fn no_opportunity_when_spread_below_threshold() {
        let (detector, mut rx) = ArbitrageDetector::new(ArbitrageConfig::default());
        let now = Utc::now();
        detector
            .on_price_update("binance", "BTCUSDT", feed(dec!(50000), dec!(50001), now))
            .await;
        detector
            .on_price_update("okx", "BTCUSDT", feed(dec!(50001), dec!(50002), now))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cleanup_removes_stale_feeds() {
        let (detector, _rx) = ArbitrageDetector::new(ArbitrageConfig::default());
        let now = Utc::now();
        detector.feeds.insert(
            ("binance".to_string(), "BTCUSDT".to_string()),
            feed(dec!(1), dec!(2), now - chrono::Duration::seconds(5)),
        );
        detector.cleanup_stale(now);
        assert!(detector.feeds.is_empty());
    }
}
