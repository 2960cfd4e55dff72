//! Backoff strategies for released jobs.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Computes how long a failed job waits before it is retried.
pub trait Backoff: Send + Sync + Debug {
    /// Delay before the next attempt, given the number of attempts made so far (1-based).
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Creates a fixed backoff.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Delay multiplied after every failure, capped at a maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
}

impl ExponentialBackoff {
    /// Creates an exponential backoff.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(3600))
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = millis.min(self.max.as_millis() as f64);

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max
        }
    }
}

/// Serializable backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Exponential backoff.
    Exponential {
        /// First delay in milliseconds.
        #[serde(default = "default_initial_delay")]
        initial_delay_ms: u64,
        /// Growth factor per attempt.
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        /// Ceiling in milliseconds.
        #[serde(default = "default_max_delay")]
        max_delay_ms: u64,
    },
}

fn default_initial_delay() -> u64 {
    1000 // 1 second
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    3_600_000 // 1 hour
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            initial_delay_ms: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl BackoffConfig {
    /// Builds the strategy.
    pub fn build(&self) -> Arc<dyn Backoff> {
        match *self {
            BackoffConfig::Fixed { delay_ms } => Arc::new(FixedBackoff::new(Duration::from_millis(delay_ms))),
            BackoffConfig::Exponential {
                initial_delay_ms,
                multiplier,
                max_delay_ms,
            } => Arc::new(ExponentialBackoff::new(
                Duration::from_millis(initial_delay_ms),
                multiplier,
                Duration::from_millis(max_delay_ms),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = FixedBackoff::new(Duration::from_millis(5000));
        assert_eq!(backoff.next_delay(1), Duration::from_millis(5000));
        assert_eq!(backoff.next_delay(7), Duration::from_millis(5000));
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = ExponentialBackoff::default();

        // 1st retry: 1000ms
        // 2nd retry: 2000ms
        // 3rd retry: 4000ms
        assert_eq!(backoff.next_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(10));
        assert_eq!(backoff.next_delay(10), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_config_defaults_to_exponential() {
        let backoff = BackoffConfig::default().build();
        assert_eq!(backoff.next_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_config_deserialize_fixed() {
        let config: BackoffConfig = serde_json::from_str(r#"{"strategy":"fixed","delay_ms":250}"#).unwrap();
        assert_eq!(config.build().next_delay(3), Duration::from_millis(250));
    }
}
