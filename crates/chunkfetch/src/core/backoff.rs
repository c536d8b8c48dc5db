use std::time::Duration;

/// Delay before retry number `retry` (0-based): `base` doubled once per
/// earlier retry, never more than `max`.
///
/// ```
/// use std::time::Duration;
/// use chunkfetch::core::backoff_delay;
///
/// let base = Duration::from_millis(250);
/// let max = Duration::from_secs(1);
/// assert_eq!(backoff_delay(0, base, max), base);
/// assert_eq!(backoff_delay(2, base, max), max);
/// assert_eq!(backoff_delay(9, base, max), max);
/// ```
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let doubled = 1u32
        .checked_shl(retry)
        .and_then(|factor| base.checked_mul(factor));
    doubled.map_or(max, |delay| delay.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: Duration = Duration::from_secs(10);

    #[test]
    fn doubles_until_the_cap() {
        let base = Duration::from_millis(500);
        let delays: Vec<_> = (0..7).map(|i| backoff_delay(i, base, MAX)).collect();
        assert_eq!(
            delays,
            [500, 1000, 2000, 4000, 8000, 10_000, 10_000].map(Duration::from_millis)
        );
    }

    #[test]
    fn zero_base_never_waits() {
        assert_eq!(backoff_delay(0, Duration::ZERO, MAX), Duration::ZERO);
        assert_eq!(backoff_delay(20, Duration::ZERO, MAX), Duration::ZERO);
    }

    #[test]
    fn huge_retry_counts_saturate_at_the_cap() {
        let base = Duration::from_secs(u64::MAX / 4);
        assert_eq!(backoff_delay(3, base, MAX), MAX);
        assert_eq!(backoff_delay(32, Duration::from_millis(1), MAX), MAX);
        assert_eq!(backoff_delay(u32::MAX, Duration::from_millis(1), MAX), MAX);
    }
}
