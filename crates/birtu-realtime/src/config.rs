//! Configuration for the real-time channel

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;
use crate::error::ChannelError;

/// API base URL the client talks to when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

// ----------------------------------------------------------------------------
// Reconnect Configuration
// ----------------------------------------------------------------------------

/// Backoff settings, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_interval_ms: u64,
    /// Upper bound on any single delay
    pub max_interval_ms: u64,
    /// Retries allowed after an unexpected close before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 1_000,
            max_interval_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_interval: Duration::from_millis(self.base_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// HTTP(S) API base; the real-time endpoint is derived from it
    pub base_url: String,
    /// Time allowed for a single connect attempt
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Configuration for a backend on this machine with short retries
    pub fn local_development() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: 5_000,
            reconnect: ReconnectConfig {
                base_interval_ms: 500,
                max_interval_ms: 5_000,
                max_attempts: 10,
            },
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.reconnect.policy()
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.base_url.trim().is_empty() {
            return Err(ChannelError::InvalidConfig("base_url is empty".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ChannelError::InvalidConfig(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.base_interval_ms == 0 {
            return Err(ChannelError::InvalidConfig(
                "reconnect.base_interval_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.max_interval_ms < self.reconnect.base_interval_ms {
            return Err(ChannelError::InvalidConfig(
                "reconnect.max_interval_ms is below base_interval_ms".to_string(),
            ));
        }
        Ok(())
    }
}
