//! Typed error taxonomy shared by every subsystem (spec.md §7).
//!
//! Internal subsystem APIs return `Result<T, OmsError>` so callers can match
//! on `kind()` instead of string-sniffing. Adapter/glue code at the binary
//! boundary (`main.rs`) keeps using `anyhow::Result`, consistent with the
//! teacher's `main.rs`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OmsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("insufficient rate limit: {0}")]
    InsufficientRateLimit(String),

    #[error("no suitable account: {0}")]
    NoSuitableAccount(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("kill switch active: {0}")]
    KillSwitch(String),

    #[error("disabled: {0}")]
    Disabled(String),
}

/// Exact, non-retryable adapter error prefixes (spec.md §4.4 step 4).
/// Match must be exact from position 0.
pub const NON_RETRYABLE_PREFIXES: &[&str] = &[
    "insufficient balance",
    "invalid symbol",
    "invalid quantity",
    "market closed",
];

/// Classify a raw adapter error string into retryable vs. permanent.
pub fn classify_adapter_error(message: &str) -> OmsError {
    for prefix in NON_RETRYABLE_PREFIXES {
        if message.starts_with(prefix) {
            return OmsError::Permanent(message.to_string());
        }
    }
    OmsError::Unavailable(message.to_string())
}

pub fn is_retryable(err: &OmsError) -> bool {
    matches!(err, OmsError::Unavailable(_) | OmsError::Timeout(_))
}
