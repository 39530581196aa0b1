//! Selection strategies used when no routing rule fires (spec.md §4.3 step 4).

use crate::decimal::clamp;
use crate::models::account::{Account, RoutingMetrics};
use crate::models::order::Order;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub account: Account,
    pub metrics: RoutingMetrics,
    pub available_weight: i64,
}

fn ratio_used(candidate: &Candidate) -> f64 {
    if candidate.account.rate_limit_weight == 0 {
        return 0.0;
    }
    let used = candidate.account.rate_limit_weight - candidate.available_weight;
    used as f64 / candidate.account.rate_limit_weight as f64
}

/// Minimum remaining rate-limit usage ratio wins; tie-break by account_id.
pub fn least_used(candidates: &[Candidate]) -> Option<Account> {
    candidates
        .iter()
        .min_by(|a, b| {
            ratio_used(a)
                .partial_cmp(&ratio_used(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        })
        .map(|c| c.account.clone())
}

/// Least-recently-used by `last_used`, respecting `rotation_cooldown`. When
/// every candidate is inside the cooldown, still returns the LRU account
/// (spec.md §4.3).
pub fn round_robin(
    candidates: &[Candidate],
    now: DateTime<Utc>,
    rotation_cooldown_secs: i64,
) -> Option<Account> {
    let outside_cooldown: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| match c.account.last_used {
            None => true,
            Some(last) => (now - last).num_seconds() > rotation_cooldown_secs,
        })
        .collect();

    let pool: Vec<&Candidate> = if outside_cooldown.is_empty() {
        candidates.iter().collect()
    } else {
        outside_cooldown
    };

    pool.into_iter()
        .min_by(|a, b| {
            let a_key = a.account.last_used.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let b_key = b.account.last_used.unwrap_or(DateTime::<Utc>::MIN_UTC);
            a_key
                .cmp(&b_key)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        })
        .map(|c| c.account.clone())
}

/// Weighted scoring strategy (spec.md §4.3).
pub fn best_fit(candidates: &[Candidate], order: &Order) -> Option<Account> {
    candidates
        .iter()
        .max_by(|a, b| {
            score(a, order)
                .partial_cmp(&score(b, order))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        })
        .map(|c| c.account.clone())
}

fn score(candidate: &Candidate, order: &Order) -> f64 {
    let mut score = 100.0;

    if order.strategy_tag().is_some() && candidate.account.strategy.as_deref() == order.strategy_tag() {
        score += 50.0;
    }

    if candidate.account.rate_limit_weight > 0 {
        let headroom = candidate.available_weight as f64 / candidate.account.rate_limit_weight as f64;
        score += (headroom * 30.0).clamp(0.0, 30.0);
    }

    // Balance adequacy is evaluated by the caller via `balance_ok`, folded
    // in as a caller-provided flag, since this module has no registry access.
    score
}

/// Extended score including balance-adequacy and position-usage terms that
/// require registry state the caller must supply.
pub fn best_fit_full(
    candidates: &[(Candidate, bool /* balance_ok */, f64 /* position_usage_ratio */)],
    order: &Order,
) -> Option<Account> {
    candidates
        .iter()
        .max_by(|(a, a_balance_ok, a_usage), (b, b_balance_ok, b_usage)| {
            let a_score = score(a, order)
                + if *a_balance_ok { 20.0 } else { -50.0 }
                + clamp_f64(a.metrics.success_rate() * 20.0, 0.0, 20.0)
                - 10.0 * a.metrics.consecutive_fails as f64
                - if *a_usage > 0.8 { 30.0 } else { 0.0 };
            let b_score = score(b, order)
                + if *b_balance_ok { 20.0 } else { -50.0 }
                + clamp_f64(b.metrics.success_rate() * 20.0, 0.0, 20.0)
                - 10.0 * b.metrics.consecutive_fails as f64
                - if *b_usage > 0.8 { 30.0 } else { 0.0 };
            a_score
                .partial_cmp(&b_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        })
        .map(|(c, _, _)| c.account.clone())
}

fn clamp_f64(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Minimum `avg_latency_ms` among accounts with `consecutive_fails < 3`.
pub fn lowest_latency(candidates: &[Candidate]) -> Option<Account> {
    candidates
        .iter()
        .filter(|c| c.metrics.consecutive_fails < 3)
        .min_by(|a, b| {
            a.metrics
                .avg_latency_ms
                .partial_cmp(&b.metrics.avg_latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.account.account_id.cmp(&b.account.account_id))
        })
        .map(|c| c.account.clone())
}

#[allow(dead_code)]
pub fn decimal_headroom(available: i64, total: i64) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    clamp(
        Decimal::from(available) / Decimal::from(total),
        Decimal::ZERO,
        Decimal::ONE,
    )
}
