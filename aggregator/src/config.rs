/// Aggregator configuration

use crate::quorum::{QuorumParams, DEFAULT_QUORUM_BUFFER_PCT, DEFAULT_REQUIRED_QUORUM_PCT};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Used when a caller does not pass its own requirement
    pub default_required_quorum_pct: u64,

    /// Used when a caller does not pass its own buffer
    pub default_quorum_buffer_pct: u64,

    /// Number of messages whose signatures are cached
    pub signature_cache_size: usize,

    /// Balance below which an L1 node identity counts as unfunded
    pub minimum_l1_validator_balance: u64,

    /// Retry ceiling for reaching a quorum of connected stake
    pub connect_timeout_ms: u64,

    /// Retry ceiling for collecting a quorum of signatures
    pub signature_request_timeout_ms: u64,

    /// Deadline of a single request wave
    pub app_request_timeout_ms: u64,

    pub retry_initial_interval_ms: u64,
    pub retry_max_interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_required_quorum_pct: DEFAULT_REQUIRED_QUORUM_PCT,
            default_quorum_buffer_pct: DEFAULT_QUORUM_BUFFER_PCT,
            signature_cache_size: 1024,
            minimum_l1_validator_balance: 2048,
            connect_timeout_ms: 5_000,
            signature_request_timeout_ms: 5_000,
            app_request_timeout_ms: 2_000,
            retry_initial_interval_ms: 100,
            retry_max_interval_ms: 1_000,
        }
    }
}

impl AggregatorConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        QuorumParams::new(self.default_required_quorum_pct, self.default_quorum_buffer_pct)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.signature_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "signature_cache_size must be greater than zero".into(),
            ));
        }
        if self.app_request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "app_request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.retry_initial_interval_ms > self.retry_max_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_initial_interval_ms ({}) exceeds retry_max_interval_ms ({})",
                self.retry_initial_interval_ms, self.retry_max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn default_quorum(&self) -> Result<QuorumParams, ConfigError> {
        QuorumParams::new(self.default_required_quorum_pct, self.default_quorum_buffer_pct)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn signature_request_timeout(&self) -> Duration {
        Duration::from_millis(self.signature_request_timeout_ms)
    }

    pub fn app_request_timeout(&self) -> Duration {
        Duration::from_millis(self.app_request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
        }
    }
}
