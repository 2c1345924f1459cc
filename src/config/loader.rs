//! Configuration loading: optional TOML file + environment overrides.

use super::{
    AnalyticsConfig, CacheConfig, DatabaseConfig, GovernorConfig, HealthConfig, QueueConfig,
    RetryConfig, WebConfig,
};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Top-level configuration for the resilience core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl CoreConfig {
    /// Load configuration from `SCANDECK_CONFIG_PATH` (if set) with
    /// `SCANDECK__`-prefixed environment overrides, then validate.
    ///
    /// Missing file and empty environment yield the documented defaults, so a
    /// bare process always starts.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("SCANDECK_CONFIG_PATH") {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SCANDECK")
                .separator("__")
                .try_parsing(true),
        );

        let config: CoreConfig = builder
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to read configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| CoreError::Configuration(format!("Invalid configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string. Used by tests and embedders.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: CoreConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to read TOML: {e}")))?
            .try_deserialize()
            .map_err(|e| CoreError::Configuration(format!("Invalid configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.health.success_threshold == 0 {
            return Err(CoreError::Configuration(
                "health.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.health.degraded_threshold >= self.health.unavailable_threshold {
            return Err(CoreError::Configuration(format!(
                "health.degraded_threshold ({}) must be below unavailable_threshold ({})",
                self.health.degraded_threshold, self.health.unavailable_threshold
            )));
        }
        if self.queue.max_entries_per_owner == 0 {
            return Err(CoreError::Configuration(
                "queue.max_entries_per_owner must be positive".to_string(),
            ));
        }
        if self.queue.replay_concurrency == 0 {
            return Err(CoreError::Configuration(
                "queue.replay_concurrency must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.governor.fallback_safety_margin) {
            return Err(CoreError::Configuration(
                "governor.fallback_safety_margin must be in [0, 1)".to_string(),
            ));
        }
        for (site, policy) in std::iter::once(("default", &self.retry.default_policy))
            .chain(self.retry.policies.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if policy.max_attempts == 0 {
                return Err(CoreError::Configuration(format!(
                    "retry policy '{site}': max_attempts must be at least 1"
                )));
            }
            if !(0.0..1.0).contains(&policy.jitter_ratio) {
                return Err(CoreError::Configuration(format!(
                    "retry policy '{site}': jitter_ratio must be in [0, 1)"
                )));
            }
        }
        if self.analytics.flush_batch_size == 0 || self.analytics.buffer_capacity == 0 {
            return Err(CoreError::Configuration(
                "analytics buffer sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.max_entries_per_owner, 500);
        assert_eq!(config.health.unavailable_threshold, 6);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = CoreConfig::from_toml(
            r#"
            [queue]
            max_entries_per_owner = 50

            [governor.tiers.free.daily_limits]
            scans = 25

            [retry.policies.classifier]
            max_attempts = 5
            base_delay_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_entries_per_owner, 50);
        assert_eq!(config.governor.tier("free").daily_limit("scans"), 25);
        assert_eq!(config.retry.policy_for("classifier").max_attempts, 5);
        assert_eq!(config.retry.policy_for("datastore").max_attempts, 3);
    }

    #[test]
    fn load_reads_file_named_by_env() {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[queue]\nmax_entries_per_owner = 9").unwrap();

        std::env::set_var("SCANDECK_CONFIG_PATH", file.path());
        let config = CoreConfig::load().unwrap();
        std::env::remove_var("SCANDECK_CONFIG_PATH");

        assert_eq!(config.queue.max_entries_per_owner, 9);
    }

    #[test]
    fn invalid_thresholds_rejected() {
        let result = CoreConfig::from_toml(
            r#"
            [health]
            degraded_threshold = 6
            unavailable_threshold = 6
            "#,
        );
        assert!(result.is_err());
    }
}
