//! Engine configuration.
//!
//! Tunables for the durable runtime: per-activity timeouts and the
//! capped-exponential retry policy. Loadable from TOML; every field has a
//! default so the engine runs unconfigured.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::runtime::{ActivityOptions, RetryPolicy};

/// Retry tuning shared by all bounded activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts before an activity is abandoned.
    pub max_attempts: u32,
    /// First backoff interval, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff growth factor per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt timeout for every activity, in seconds.
    pub activity_timeout_secs: u64,
    /// Retry tuning for bounded activities.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activity_timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config {
            reason: e.to_string(),
        })
    }

    /// Options for ordinary activities: bounded retries.
    pub fn activity_options(&self) -> ActivityOptions {
        ActivityOptions {
            timeout: Duration::from_secs(self.activity_timeout_secs),
            retry: RetryPolicy {
                max_attempts: Some(self.retry.max_attempts),
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
                multiplier: self.retry.multiplier,
            },
        }
    }

    /// Options for outcome recording: retried without bound.
    ///
    /// A missing outcome silently corrupts the calibration loop, so this
    /// is the one activity exempted from "give up after bounded retries".
    pub fn outcome_options(&self) -> ActivityOptions {
        let mut opts = self.activity_options();
        opts.retry.max_attempts = None;
        opts
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.activity_timeout_secs, 120);
        assert_eq!(config.retry.max_attempts, 5);

        let opts = config.activity_options();
        assert_eq!(opts.retry.max_attempts, Some(5));
        assert_eq!(opts.timeout, Duration::from_secs(120));

        let outcome = config.outcome_options();
        assert_eq!(outcome.retry.max_attempts, None);
    }

    #[test]
    fn parses_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            activity_timeout_secs = 30

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.activity_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.retry.initial_backoff_ms, 200);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let result = EngineConfig::from_toml_str("activity_timeout_secs = \"soon\"");
        assert!(matches!(
            result.unwrap_err(),
            EngineError::Config { .. }
        ));
    }
}
