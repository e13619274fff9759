//! Backoff schedule for retry re-insertion.

use std::time::Duration;

/// Compute the backoff delay for a given attempt count.
///
/// Binary exponential: `base * 2^(attempt - 1)`, capped at `max`. Attempt 0
/// maps to zero delay. The result is non-decreasing in the attempt count.
///
/// # Examples (base=500ms, max=30s)
///
/// | Attempt | Delay |
/// |---------|-------|
/// | 0       | 0ms   |
/// | 1       | 500ms |
/// | 2       | 1s    |
/// | 3       | 2s    |
/// | 8       | 30s (capped) |
pub fn compute_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let shift = attempt.saturating_sub(1);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(4);

        assert_eq!(compute_backoff(0, base, max), Duration::ZERO);
        assert_eq!(compute_backoff(1, base, max), Duration::from_millis(500));
        assert_eq!(compute_backoff(2, base, max), Duration::from_secs(1));
        assert_eq!(compute_backoff(3, base, max), Duration::from_secs(2));
        assert_eq!(compute_backoff(4, base, max), Duration::from_secs(4));
        assert_eq!(compute_backoff(5, base, max), Duration::from_secs(4));
    }

    #[test]
    fn non_decreasing_in_attempt_count() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);

        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = compute_backoff(attempt, base, max);
            assert!(delay >= previous, "attempt {attempt} decreased the delay");
            previous = delay;
        }
    }

    #[test]
    fn large_attempt_count_saturates() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        assert_eq!(compute_backoff(u32::MAX, base, max), max);
    }
}
