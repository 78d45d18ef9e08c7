use rand::Rng;
use std::time::Duration;

/// Exponential backoff with randomized jitter.
///
/// Used by every background sync path (registry push, router pull, relay
/// self-registration) so that a flapping peer is retried without hammering it.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use hvpn_common::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(100),
    ///     Duration::from_millis(5000),
    ///     2.0,
    /// );
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(75)); // 100ms * 0.75 jitter
    /// assert!(delay <= Duration::from_millis(125)); // 100ms * 1.25 jitter
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
            attempts: 0,
        }
    }

    /// Policy used for upstream sync: 500ms doubling up to one minute.
    #[must_use]
    pub const fn for_sync() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60), 2.0)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    /// Compute the next delay (with jitter) and advance the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;

        let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
        let jittered_ms = (current_ms as f64 * jitter_factor) as u64;
        let delay = Duration::from_millis(jittered_ms.max(1));

        let next_ms = (current_ms as f64 * self.factor) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        self.current = Duration::from_millis(next_ms.min(max_ms));
        self.attempts = self.attempts.saturating_add(1);

        delay
    }

    /// Number of delays handed out since creation or the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to its initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_is_positive() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(5000), 2.0);
        assert!(backoff.next_delay() > Duration::ZERO);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn delays_never_exceed_max_with_jitter() {
        let max = Duration::from_millis(1000);
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), max, 2.0);

        for _ in 0..20 {
            let delay = backoff.next_delay();
            let max_with_jitter = max.as_millis() as f64 * 1.25;
            assert!(
                delay.as_millis() as f64 <= max_with_jitter + 1.0,
                "delay {delay:?} exceeds {max_with_jitter}"
            );
        }
    }

    #[test]
    fn reset_clears_attempts_and_delay() {
        let initial = Duration::from_millis(100);
        let mut backoff = ExponentialBackoff::new(initial, Duration::from_millis(5000), 2.0);
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempts(), 10);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(74) && delay <= Duration::from_millis(126));
    }

    #[test]
    fn overflow_safety_with_large_max() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::MAX, 2.0);
        for _ in 0..100 {
            assert!(backoff.next_delay() > Duration::ZERO);
        }
    }
}
