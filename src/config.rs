//! Configuration for a streaming session
//!
//! A `StreamConfig` is created once at session start and never mutated.
//! All values have built-in defaults defined in code; a TOML file and
//! command-line overrides can replace them before the session is built.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay_secs() -> f64 {
    2.0
}

fn default_buffer_queue_size() -> usize {
    20
}

fn default_min_buffers_before_playback() -> usize {
    5
}

fn default_connection_timeout_secs() -> f64 {
    10.0
}

fn default_stall_grace_secs() -> f64 {
    1.5
}

fn default_max_stall_recoveries() -> u32 {
    3
}

/// Immutable streaming session configuration.
///
/// Owned by the session; components borrow what they need at start.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Source stream URL (http or https)
    pub url: String,

    /// Reconnect automatically after a connection loss
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Maximum reconnect attempts before the session fails
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay between reconnect attempts, in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: f64,

    /// Buffer queue capacity in PCM buffers
    #[serde(default = "default_buffer_queue_size")]
    pub buffer_queue_size: usize,

    /// Buffered PCM buffers required before playback starts
    #[serde(default = "default_min_buffers_before_playback")]
    pub min_buffers_before_playback: usize,

    /// Connection establishment timeout, in seconds
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: f64,

    /// Grace window before an empty queue while playing counts as a stall,
    /// in seconds
    #[serde(default = "default_stall_grace_secs")]
    pub stall_grace_secs: f64,

    /// Consecutive unrecovered stall episodes before the session fails
    #[serde(default = "default_max_stall_recoveries")]
    pub max_stall_recoveries: u32,
}

impl StreamConfig {
    /// Build a configuration for the given URL with built-in defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            buffer_queue_size: default_buffer_queue_size(),
            min_buffers_before_playback: default_min_buffers_before_playback(),
            connection_timeout_secs: default_connection_timeout_secs(),
            stall_grace_secs: default_stall_grace_secs(),
            max_stall_recoveries: default_max_stall_recoveries(),
        }
    }

    /// Load configuration from a TOML file.
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: StreamConfig = toml::from_str(&toml_str)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        info!("Loaded stream configuration from {:?}", path);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides, returning the updated configuration.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(url) = overrides.url {
            self.url = url;
        }
        if let Some(auto) = overrides.auto_reconnect {
            self.auto_reconnect = auto;
        }
        if let Some(max) = overrides.max_reconnect_attempts {
            self.max_reconnect_attempts = max;
        }
        self
    }

    /// Validate configuration invariants.
    ///
    /// Rejects empty URLs, URLs reqwest cannot parse, zero queue capacity,
    /// and a playback threshold larger than the queue itself.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("Stream URL must not be empty".to_string()));
        }
        reqwest::Url::parse(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {}", self.url, e)))?;
        if self.buffer_queue_size == 0 {
            return Err(Error::Config(
                "buffer_queue_size must be at least 1".to_string(),
            ));
        }
        if self.min_buffers_before_playback > self.buffer_queue_size {
            return Err(Error::Config(format!(
                "min_buffers_before_playback ({}) exceeds buffer_queue_size ({})",
                self.min_buffers_before_playback, self.buffer_queue_size
            )));
        }
        if self.connection_timeout_secs <= 0.0 || self.stall_grace_secs <= 0.0 {
            return Err(Error::Config(
                "Timeouts must be positive and bounded".to_string(),
            ));
        }
        Ok(())
    }

    /// Reconnect delay as a Duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }

    /// Connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs)
    }

    /// Stall grace window as a Duration
    pub fn stall_grace(&self) -> Duration {
        Duration::from_secs_f64(self.stall_grace_secs)
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub auto_reconnect: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
}
