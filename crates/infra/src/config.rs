//! Environment-driven configuration for the ledger runtime.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TOKENLEDGER_DATABASE_URL` | `sqlite://tokenledger.db?mode=rwc` |
//! | `TOKENLEDGER_MAX_CONNECTIONS` | `5` |
//! | `TOKENLEDGER_BUSY_TIMEOUT_MS` | `5000` |
//! | `TOKENLEDGER_RETRY_ATTEMPTS` | `3` |
//! | `TOKENLEDGER_RETRY_BACKOFF_MS` | `25` |
//!
//! Unparseable values fall back to the default with a warning.

use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tokenledger.db?mode=rwc";

/// Retry policy for units that fail with a retryable store error.
///
/// Every unit is all-or-nothing, so re-running one after a rollback is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given retry number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Check if more retries are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Runtime configuration for the durable store and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_url = lookup("TOKENLEDGER_DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                tracing::debug!("TOKENLEDGER_DATABASE_URL not set; using {}", DEFAULT_DATABASE_URL);
                defaults.database_url.clone()
            });

        let max_connections = parse_or(&lookup, "TOKENLEDGER_MAX_CONNECTIONS", defaults.max_connections)
            .max(1);
        let busy_timeout_ms = parse_or(
            &lookup,
            "TOKENLEDGER_BUSY_TIMEOUT_MS",
            defaults.busy_timeout.as_millis() as u64,
        );
        let retry_attempts = parse_or(&lookup, "TOKENLEDGER_RETRY_ATTEMPTS", defaults.retry.max_attempts);
        let backoff_ms = parse_or(
            &lookup,
            "TOKENLEDGER_RETRY_BACKOFF_MS",
            defaults.retry.base_delay.as_millis() as u64,
        );

        Self {
            database_url,
            max_connections,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            retry: RetryPolicy {
                max_attempts: retry_attempts,
                base_delay: Duration::from_millis(backoff_ms),
                max_delay: defaults.retry.max_delay,
            },
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw:?} is not valid; using default {default}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> LedgerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config_from(&[]), LedgerConfig::default());
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = config_from(&[
            ("TOKENLEDGER_DATABASE_URL", "sqlite::memory:"),
            ("TOKENLEDGER_MAX_CONNECTIONS", "9"),
            ("TOKENLEDGER_BUSY_TIMEOUT_MS", "250"),
            ("TOKENLEDGER_RETRY_ATTEMPTS", "0"),
            ("TOKENLEDGER_RETRY_BACKOFF_MS", "7"),
        ]);

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 9);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 0);
        assert_eq!(config.retry.base_delay, Duration::from_millis(7));
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("TOKENLEDGER_MAX_CONNECTIONS", "many"),
            ("TOKENLEDGER_RETRY_ATTEMPTS", "-1"),
        ]);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn retry_delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));

        assert!(policy.should_retry(9));
        assert!(!policy.should_retry(10));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }
}
