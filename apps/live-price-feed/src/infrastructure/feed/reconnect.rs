//! Reconnection Policy
//!
//! Bounded backoff with jitter for the feed WebSocket. The default is a
//! fixed 3 s delay (multiplier 1.0) with ±10 % jitter and five attempts
//! before the supervisor falls back to backup mode.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

/// Reconnection policy implementing capped backoff with jitter.
///
/// # Example
///
/// ```rust
/// use live_price_feed::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// let delay = policy.next_delay();
/// assert!(delay.is_some());
///
/// // Connection established
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay, or `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay_with_jitter)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts: attempts,
        }
    }

    #[test]
    fn default_is_fixed_three_seconds() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(3));
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn fixed_delay_with_unit_multiplier() {
        let mut policy = ReconnectPolicy::new(config(3_000, 30_000, 1.0, 0));

        for _ in 0..4 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(3_000)));
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let mut policy = ReconnectPolicy::new(config(100, 300, 2.0, 0));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn budget_is_bounded() {
        let mut policy = ReconnectPolicy::new(config(100, 1_000, 1.0, 3));

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn reset_restores_budget() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                max_attempts: 0,
                ..ReconnectConfig::default()
            });

            let millis = policy.next_delay().unwrap().as_millis();

            assert!((2_700..=3_300).contains(&millis), "delay {millis}ms out of range");
        }
    }
}
