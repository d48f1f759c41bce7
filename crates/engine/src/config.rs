//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tether_core::calculator::StreakRules;
use tether_core::reward::RecoveryKind;
use tether_core::retry::RetryPolicy;
use tether_core::streak::{DEFAULT_CONTACT_FREQUENCY_DAYS, GRACE_PERIOD_DAYS};

#[derive(Debug, thiserror::Error)]
#[error("{var} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Streak engine configuration.
///
/// All fields have defaults matching the documented product rules; override
/// them through environment variables in deployments.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Days after the due date before a streak breaks (default: `2`).
    pub grace_period_days: i64,
    /// Cadence for relationships never explicitly configured (default: `7`).
    pub default_frequency_days: i32,
    /// Bound on every remote store call (default: 5 s).
    pub remote_timeout: Duration,
    /// Retry policy for foreground remote calls. Short: a failing call falls
    /// back to the offline queue rather than keep the caller waiting.
    pub remote_retry: RetryPolicy,
    /// Retry policy for each replayed offline event.
    pub replay_retry: RetryPolicy,
    /// Grace extension granted by a FREEZE item (default: `1` day).
    pub freeze_extension_days: i64,
    /// Grace extension granted by a SAVER item (default: `3` days).
    pub saver_extension_days: i64,
    /// Directory for the file-backed local cache.
    pub cache_dir: PathBuf,
    /// How often the background sweep loop runs (default: 24 h).
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_days: GRACE_PERIOD_DAYS,
            default_frequency_days: DEFAULT_CONTACT_FREQUENCY_DAYS,
            remote_timeout: Duration::from_millis(5000),
            remote_retry: foreground_retry(),
            replay_retry: RetryPolicy::default(),
            freeze_extension_days: 1,
            saver_extension_days: 3,
            cache_dir: PathBuf::from(".tether-cache"),
            sweep_interval: Duration::from_secs(86_400),
        }
    }
}

fn foreground_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        ..Default::default()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default         |
    /// |------------------------------------|-----------------|
    /// | `STREAK_GRACE_PERIOD_DAYS`         | `2`             |
    /// | `STREAK_DEFAULT_FREQUENCY_DAYS`    | `7`             |
    /// | `STREAK_REMOTE_TIMEOUT_MS`         | `5000`          |
    /// | `STREAK_REPLAY_MAX_ATTEMPTS`       | `5`             |
    /// | `STREAK_REPLAY_INITIAL_BACKOFF_MS` | `500`           |
    /// | `STREAK_FREEZE_EXTENSION_DAYS`     | `1`             |
    /// | `STREAK_SAVER_EXTENSION_DAYS`      | `3`             |
    /// | `STREAK_CACHE_DIR`                 | `.tether-cache` |
    /// | `SWEEP_INTERVAL_SECS`              | `86400`         |
    pub fn from_env() -> Result<Self, ConfigError> {
        let grace_period_days: i64 = parse_var("STREAK_GRACE_PERIOD_DAYS", "2", "i64")?;
        let default_frequency_days: i32 = parse_var("STREAK_DEFAULT_FREQUENCY_DAYS", "7", "i32")?;
        if default_frequency_days <= 0 {
            return Err(ConfigError {
                var: "STREAK_DEFAULT_FREQUENCY_DAYS",
                value: default_frequency_days.to_string(),
                expected: "positive day count",
            });
        }

        let remote_timeout_ms: u64 = parse_var("STREAK_REMOTE_TIMEOUT_MS", "5000", "u64")?;
        let replay_attempts: u32 = parse_var("STREAK_REPLAY_MAX_ATTEMPTS", "5", "u32")?;
        let replay_backoff_ms: u64 = parse_var("STREAK_REPLAY_INITIAL_BACKOFF_MS", "500", "u64")?;
        let freeze_extension_days: i64 = parse_var("STREAK_FREEZE_EXTENSION_DAYS", "1", "i64")?;
        let saver_extension_days: i64 = parse_var("STREAK_SAVER_EXTENSION_DAYS", "3", "i64")?;
        let cache_dir = std::env::var("STREAK_CACHE_DIR").unwrap_or_else(|_| ".tether-cache".into());
        let sweep_interval_secs: u64 = parse_var("SWEEP_INTERVAL_SECS", "86400", "u64")?;

        Ok(Self {
            grace_period_days,
            default_frequency_days,
            remote_timeout: Duration::from_millis(remote_timeout_ms),
            remote_retry: foreground_retry(),
            replay_retry: RetryPolicy {
                max_attempts: replay_attempts.max(1),
                initial_delay: Duration::from_millis(replay_backoff_ms),
                ..Default::default()
            },
            freeze_extension_days,
            saver_extension_days,
            cache_dir: PathBuf::from(cache_dir),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
        })
    }

    pub fn rules(&self) -> StreakRules {
        StreakRules {
            grace_period_days: self.grace_period_days,
        }
    }

    /// Grace extension applied when a recovery item of `kind` is used.
    pub fn extension_days(&self, kind: RecoveryKind) -> i64 {
        match kind {
            RecoveryKind::Freeze => self.freeze_extension_days,
            RecoveryKind::Saver => self.saver_extension_days,
        }
    }
}

fn parse_var<T: FromStr>(
    var: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = std::env::var(var).unwrap_or_else(|_| default.into());
    value.trim().parse().map_err(|_| ConfigError {
        var,
        value,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_rules() {
        let config = EngineConfig::default();
        assert_eq!(config.rules().grace_period_days, 2);
        assert_eq!(config.default_frequency_days, 7);
        assert_eq!(config.extension_days(RecoveryKind::Freeze), 1);
        assert_eq!(config.extension_days(RecoveryKind::Saver), 3);
        assert_eq!(config.replay_retry.max_attempts, 5);
    }

    #[test]
    fn parse_var_reports_bad_values() {
        // Variable name unique to this test so parallel tests never race on it.
        std::env::set_var("TETHER_TEST_BAD_NUMBER", "seven");
        let err = parse_var::<i32>("TETHER_TEST_BAD_NUMBER", "7", "i32").unwrap_err();
        assert_eq!(err.var, "TETHER_TEST_BAD_NUMBER");
        assert_eq!(err.value, "seven");
        std::env::remove_var("TETHER_TEST_BAD_NUMBER");
    }

    #[test]
    fn parse_var_falls_back_to_default() {
        let value: u64 = parse_var("TETHER_TEST_UNSET_VARIABLE", "42", "u64").unwrap();
        assert_eq!(value, 42);
    }
}
