//! Fixed-point helpers shared across the control plane.
//!
//! All prices, quantities, fees, and balances are `rust_decimal::Decimal`.
//! No subsystem in this crate performs floating-point arithmetic on a
//! monetary value; `f64` appears only in non-monetary statistical estimates
//! (volatility, confidence scores, basis-point multipliers).

use rust_decimal::Decimal;

/// Clamp a decimal between `lo` and `hi` inclusive.
pub fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

/// Apply a basis-point adjustment: `value * (1 + bps / 10_000)`.
pub fn apply_bps(value: Decimal, bps: Decimal) -> Decimal {
    value * (Decimal::ONE + bps / Decimal::from(10_000))
}

/// Convert a basis-point spread into a fractional rate (`bps / 10_000`).
pub fn bps_to_rate(bps: Decimal) -> Decimal {
    bps / Decimal::from(10_000)
}
