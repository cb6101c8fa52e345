//! Reconnection Policy
//!
//! Exponential backoff with upward-only jitter for reconnecting a lost
//! stream. Delays never decrease between consecutive failures and never
//! exceed the configured maximum. There is no attempt limit: a session keeps
//! reconnecting until the caller disconnects.
//!
//! The sequence resets to the initial delay only after a connection has
//! stayed in `Streaming` for at least the stability period.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Upward jitter as a fraction of the delay (e.g., 0.1 = up to +10%).
    pub jitter_factor: f64,
    /// Time a connection must stream before the backoff resets.
    pub stability_period: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter_factor: 0.1,
            stability_period: Duration::from_secs(30),
        }
    }
}

/// Backoff state for one session.
///
/// # Example
///
/// ```rust
/// use alpaca_streaming::infrastructure::alpaca::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// let first = policy.next_delay();
/// let second = policy.next_delay();
/// assert!(second >= first);
///
/// // A connection that streamed long enough resets the sequence.
/// assert!(policy.record_connection(Some(Duration::from_secs(60))));
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    last_delay: Duration,
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
            last_delay: Duration::ZERO,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count = self.attempt_count.saturating_add(1);

        let delay = self
            .apply_jitter(self.current_delay)
            .max(self.last_delay)
            .min(self.config.max_delay);
        self.last_delay = delay;

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
        let capped = next_millis
            .max(self.current_delay.as_millis())
            .min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay
    }

    /// Account for a connection that ended.
    ///
    /// `streamed_for` is how long it stayed in `Streaming`, if it got there.
    /// Returns `true` when the backoff was reset.
    pub const fn record_connection(&mut self, streamed_for: Option<Duration>) -> bool {
        match streamed_for {
            Some(duration) if duration.as_nanos() >= self.config.stability_period.as_nanos() => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Return to the initial delay.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.last_delay = Duration::ZERO;
        self.attempt_count = 0;
    }

    /// Consecutive attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(0.0..=jitter_range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter) as u64;
        Duration::from_millis(adjusted)
    }
}
