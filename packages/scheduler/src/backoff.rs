//! Retry backoff with jitter.

/// Ceiling applied after jitter.
const MAX_BACKOFF_MS: f64 = 60_000.0;

/// Delay before the next attempt, in milliseconds.
///
/// Base doubles per failed attempt starting at 1s; uniform jitter of ±20%
/// spreads retries across workers; the result is capped at 60s.
pub(crate) fn retry_backoff_ms(attempts: i32) -> i64 {
    let exponent = attempts.saturating_sub(1).clamp(0, 20);
    let base = 1_000.0 * 2f64.powi(exponent);
    let jitter = (fastrand::f64() * 2.0 - 1.0) * 0.2 * base;
    (base + jitter).min(MAX_BACKOFF_MS) as i64
}
