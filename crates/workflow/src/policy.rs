//! Retry backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between retries grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Wait the same interval before every retry.
    #[default]
    Fixed,

    /// Double the interval after every failed attempt, optionally capped.
    Exponential { max_interval_seconds: Option<u64> },
}

impl Backoff {
    /// Delay before the retry following the given (1-based) failed attempt.
    pub fn delay(&self, interval_seconds: u64, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed => Duration::from_secs(interval_seconds),
            Backoff::Exponential {
                max_interval_seconds,
            } => {
                let exponent = attempt.saturating_sub(1).min(32);
                let secs = interval_seconds.saturating_mul(1u64 << exponent);
                let secs = match max_interval_seconds {
                    Some(max) => secs.min(*max),
                    None => secs,
                };
                Duration::from_secs(secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed;
        assert_eq!(backoff.delay(3, 1), Duration::from_secs(3));
        assert_eq!(backoff.delay(3, 5), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::Exponential {
            max_interval_seconds: None,
        };
        assert_eq!(backoff.delay(2, 1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2, 2), Duration::from_secs(4));
        assert_eq!(backoff.delay(2, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            max_interval_seconds: Some(10),
        };
        assert_eq!(backoff.delay(4, 3), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let backoff = Backoff::Exponential {
            max_interval_seconds: None,
        };
        assert_eq!(backoff.delay(u64::MAX, 40), Duration::from_secs(u64::MAX));
    }
}
