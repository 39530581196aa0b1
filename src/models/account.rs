//! Account, Balance, and RateLimitInfo (spec.md §3).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    Main,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Spot,
    Futures,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub exchange: String,
    pub account_type: AccountType,
    pub strategy: Option<String>,
    pub spot_enabled: bool,
    pub futures_enabled: bool,
    /// Integer rate-limit budget per 60s window.
    pub rate_limit_weight: i64,
    /// Zero means "unbounded".
    pub max_position_usdt: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            exchange: String::new(),
            account_type: AccountType::Sub,
            strategy: None,
            spot_enabled: true,
            futures_enabled: false,
            rate_limit_weight: 1200,
            max_position_usdt: Decimal::ZERO,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_used: None,
            metadata: HashMap::new(),
        }
    }
}

impl Account {
    pub fn supports_market(&self, market: Market) -> bool {
        match market {
            Market::Spot => self.spot_enabled,
            Market::Futures => self.futures_enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total_usdt: Decimal,
    pub per_asset: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub window_start: DateTime<Utc>,
    pub used_weight: i64,
}

impl RateLimitInfo {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            used_weight: 0,
        }
    }

    /// True if the 60s window has expired as of `now`.
    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.window_start).num_seconds() > 60
    }

    pub fn available(&self, rate_limit_weight: i64, now: DateTime<Utc>) -> i64 {
        if self.window_expired(now) {
            rate_limit_weight
        } else {
            rate_limit_weight - self.used_weight
        }
    }

    /// Charge `added_weight`, resetting the window first if expired.
    pub fn charge(&mut self, added_weight: i64, now: DateTime<Utc>) {
        if self.window_expired(now) {
            self.window_start = now;
            self.used_weight = added_weight;
        } else {
            self.used_weight += added_weight;
        }
    }
}

/// Per-account routing outcome bookkeeping (spec.md §4.3, §9 Open Question a).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub orders_routed: u64,
    pub successful: u64,
    pub consecutive_fails: u32,
    /// Milliseconds, exponentially-weighted running average.
    pub avg_latency_ms: f64,
}

impl RoutingMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.orders_routed == 0 {
            1.0
        } else {
            self.successful as f64 / self.orders_routed as f64
        }
    }

    pub fn record_success(&mut self, latency_ms: f64) {
        self.orders_routed += 1;
        self.successful += 1;
        self.consecutive_fails = 0;
        // Simple EWMA, alpha = 0.2, matching the teacher's latency-tracker smoothing habit.
        if self.avg_latency_ms == 0.0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms = 0.8 * self.avg_latency_ms + 0.2 * latency_ms;
        }
    }

    pub fn record_failure(&mut self) {
        self.orders_routed += 1;
        self.consecutive_fails += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub exchange: Option<String>,
    pub account_type: Option<AccountType>,
    pub strategy: Option<String>,
    pub active: Option<bool>,
    pub market: Option<Market>,
    pub min_balance: Option<Decimal>,
}
