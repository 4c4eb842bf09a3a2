//! Consumer configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is a
//! valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer name, used in log spans.
    pub name: String,

    /// Retry of failed ack/requeue calls.
    pub settle_retry: SettleRetryConfig,

    /// Settings for the in-memory source.
    pub memory: MemorySourceConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            settle_retry: SettleRetryConfig::default(),
            memory: MemorySourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    /// Cap for a single backoff delay.
    pub max_delay_ms: u64,
}

/// Largest accepted backoff multiplier.
pub const MAX_MULTIPLIER: f64 = 100.0;

impl Default for SettleRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            jitter: 0.1,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySourceConfig {
    /// Dead-letter a task after this many deliveries. `None` = redeliver forever.
    pub max_deliveries: Option<u32>,
}

impl ConsumerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.settle_retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "settle_retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&retry.multiplier) {
            return Err(ConfigError::Invalid(format!(
                "settle_retry.multiplier must be within [1, {MAX_MULTIPLIER}], got {}",
                retry.multiplier
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "settle_retry.max_delay_ms ({}) must be >= base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid(format!(
                "settle_retry.jitter must be within [0, 1], got {}",
                retry.jitter
            )));
        }
        if self.memory.max_deliveries == Some(0) {
            return Err(ConfigError::Invalid(
                "memory.max_deliveries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
