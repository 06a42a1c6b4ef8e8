//! Exponential backoff for failed dispatch attempts

use std::time::Duration;

use rand::Rng;

/// Calculate the delay before the next attempt using exponential backoff
/// with optional jitter
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
///
/// # Arguments
/// * `attempt` - The attempt that just failed (1-indexed)
/// * `base_delay_ms` - Base delay in milliseconds
/// * `max_delay_ms` - Upper bound on the delay before jitter
/// * `jitter_factor` - Jitter factor (e.g., 0.2 for ±20%, 0.0 for none)
pub fn calculate_backoff(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_ms
    } else {
        base_delay_ms.saturating_mul(1u64 << exponent).min(max_delay_ms)
    };

    if jitter_factor <= 0.0 || delay == 0 {
        return Duration::from_millis(delay);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "Jitter only needs approximate millisecond precision"
    )]
    let jittered = {
        let jitter_range = (delay as f64) * jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    };

    Duration::from_millis(jittered)
}
