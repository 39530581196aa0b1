//! MarketMakerLoop (spec.md §4.7): ties `SpreadCalculator`, `InventoryManager`,
//! `QuoteGenerator` and [`MmRiskManager`] together for one symbol instance.
//!
//! Each loop owns one `tokio::sync::Mutex` over its mutable state, serializing
//! `handle_order_update`/`handle_trade_update`/`refresh_quotes` per instance.

use crate::adapter::{publish_json, EventSink, ExchangeAdapter};
use crate::clock::Clock;
use crate::config::MarketMakerConfig;
use crate::error::OmsError;
use crate::marketmaker::inventory::InventoryManager;
use crate::marketmaker::quotes::{QuoteLadder, QuoteGenerator};
use crate::marketmaker::risk::{MmRiskManager, RiskAction};
use crate::marketmaker::spread::SpreadCalculator;
use crate::models::arbitrage::PriceFeed;
use crate::models::order::{Order, OrderType, Side, TimeInForce};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

struct LoopState {
    spread: SpreadCalculator,
    inventory: InventoryManager,
    last_ladder: Option<QuoteLadder>,
}

pub struct MarketMakerLoop {
    pub instance_id: String,
    pub symbol: String,
    account_id: String,
    adapter: Arc<dyn ExchangeAdapter>,
    config: MarketMakerConfig,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    risk: MmRiskManager,
    state: Mutex<LoopState>,
}

#[derive(Debug, Serialize)]
struct QuoteEvent {
    instance_id: String,
    symbol: String,
    mid: Decimal,
    spread_bps: Decimal,
    bids: usize,
    asks: usize,
}

impl MarketMakerLoop {
    pub fn new(
        instance_id: String,
        symbol: String,
        account_id: String,
        adapter: Arc<dyn ExchangeAdapter>,
        config: MarketMakerConfig,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let state = LoopState {
            spread: SpreadCalculator::new(),
            inventory: InventoryManager::new(clock.clone()),
            last_ladder: None,
        };
        Self {
            instance_id,
            symbol,
            account_id,
            adapter,
            config,
            clock,
            event_sink,
            risk: MmRiskManager::new(),
            state: Mutex::new(state),
        }
    }

    /// Recompute spread/skew, build a fresh ladder, and replace quotes if it
    /// differs from the last placed one by more than one tick.
    pub async fn refresh_quotes(&self) -> Result<(), OmsError> {
        let feed = self
            .adapter
            .get_order_book(&self.account_id, &self.symbol, 10)
            .await?;
        if feed.is_stale(self.clock.now()) {
            warn!(symbol = %self.symbol, "order book feed is stale, skipping quote refresh");
            return Ok(());
        }
        let mid = (feed.bid + feed.ask) / Decimal::TWO;
        let book_depth = feed.bid_qty * feed.bid + feed.ask_qty * feed.ask;

        let mut state = self.state.lock().await;

        let action = self.risk.periodic_check(&state.inventory, &self.config).await;
        if action == RiskAction::KillSwitch {
            self.cancel_all().await;
            return Err(OmsError::KillSwitch(format!(
                "market maker {} killed",
                self.instance_id
            )));
        }

        if let Some(hedge_qty) = state.inventory.should_hedge(&self.config) {
            warn!(symbol = %self.symbol, hedge_qty = %hedge_qty, "market maker inventory past hedge threshold");
        }

        state.spread.observe_mid(mid);
        let position = state.inventory.state().position;
        let spread_bps = state.spread.spread_bps(position, book_depth, &self.config);
        let (bid_spread_bps, ask_spread_bps) = SpreadCalculator::bid_ask_skew(spread_bps, position, &self.config);

        let mut ladder = QuoteGenerator::generate(mid, bid_spread_bps, ask_spread_bps, &state.inventory, &self.config);
        let multiplier = self.risk.current_size_multiplier().await;
        if multiplier != Decimal::ONE {
            for level in ladder.bids.iter_mut().chain(ladder.asks.iter_mut()) {
                level.size *= multiplier;
            }
        }

        if !QuoteGenerator::needs_update(state.last_ladder.as_ref(), &ladder, self.config.tick_size) {
            return Ok(());
        }

        self.place_ladder(&ladder, &state.inventory).await?;
        info!(symbol = %self.symbol, mid = %mid, spread_bps = %spread_bps, "quotes refreshed");
        publish_json(
            self.event_sink.as_ref(),
            &format!("oms.marketmaker.{}.quotes", self.instance_id),
            &QuoteEvent {
                instance_id: self.instance_id.clone(),
                symbol: self.symbol.clone(),
                mid,
                spread_bps,
                bids: ladder.bids.len(),
                asks: ladder.asks.len(),
            },
        )
        .await;
        state.last_ladder = Some(ladder);
        Ok(())
    }

    async fn place_ladder(&self, ladder: &QuoteLadder, inventory: &InventoryManager) -> Result<(), OmsError> {
        for level in &ladder.bids {
            self.place_quote(Side::Buy, level.price, level.size, inventory).await;
        }
        for level in &ladder.asks {
            self.place_quote(Side::Sell, level.price, level.size, inventory).await;
        }
        Ok(())
    }

    async fn place_quote(&self, side: Side, price: Decimal, size: Decimal, inventory: &InventoryManager) {
        if size <= Decimal::ZERO {
            return;
        }
        if let Err(reason) = self.risk.check_pre_order(inventory, side, size, price, &self.config) {
            warn!(symbol = %self.symbol, side = ?side, reason = %reason, "quote rejected by pre-order risk gate");
            return;
        }
        let order = Order {
            symbol: self.symbol.clone(),
            side,
            order_type: OrderType::Limit,
            quantity: size,
            price,
            time_in_force: TimeInForce::GTC,
            position_side: None,
            reduce_only: false,
            metadata: HashMap::new(),
        };
        if let Err(e) = self.adapter.place_order(&self.account_id, &order).await {
            warn!(symbol = %self.symbol, error = %e, "quote placement failed");
        }
    }

    async fn cancel_all(&self) {
        if let Ok(open) = self.adapter.get_open_orders(&self.account_id, &self.symbol).await {
            for placed in open {
                let _ = self
                    .adapter
                    .cancel_order(&self.account_id, &self.symbol, &placed.exchange_order_id)
                    .await;
            }
        }
    }

    /// React to an order-book update pushed out-of-band from the refresh
    /// cadence (e.g. a websocket tick) by recomputing and replacing quotes.
    pub async fn handle_order_update(&self, feed: &PriceFeed) -> Result<(), OmsError> {
        if feed.is_stale(self.clock.now()) {
            return Ok(());
        }
        self.refresh_quotes().await
    }

    /// Record a fill against this instance's inventory.
    pub async fn handle_trade_update(&self, side: Side, qty: Decimal, price: Decimal, fee: Decimal) {
        let mut state = self.state.lock().await;
        state.inventory.record_fill(side, qty, price, fee);
        state.inventory.mark(price);
        state.spread.record_trade(side, qty);
        info!(
            symbol = %self.symbol,
            position = %state.inventory.state().position,
            "trade recorded"
        );
    }

    pub async fn inventory_snapshot(&self) -> crate::models::inventory::InventoryState {
        self.state.lock().await.inventory.state().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.risk.is_killed()
    }

    /// Background ticker calling `refresh_quotes` at `refresh_rate_ms`.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let interval_ms = self.config.refresh_rate_ms.max(1) as u64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_quotes().await {
                            warn!(instance = %self.instance_id, error = %e, "market maker refresh failed");
                            if self.is_killed() {
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            self.cancel_all().await;
                            break;
                        }
                    }
                }
            }
        })
    }
}
