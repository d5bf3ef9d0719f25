//! Exponential backoff.

use std::time::Duration;

/// Capped exponential delay before retry number `attempt` (1-based):
/// `min(base * 2^(attempt-1), max)`. Attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(max)
}
