//! Client configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use serverquery_client::ClientConfig;
//!
//! let config = ClientConfig::from_json_str(r#"{ "pacing": { "interval_ms": 500 } }"#).unwrap();
//! assert!(config.pacing.enabled);
//! assert_eq!(config.pacing.interval_ms, 500);
//! assert!(config.keepalive.enabled);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{DEFAULT_GREETING_LINES, DEFAULT_SERVER_IDENTIFIER};

/// Default pacing interval in milliseconds.
pub const DEFAULT_PACING_INTERVAL_MS: u64 = 350;

/// Default keepalive interval in milliseconds (4 minutes).
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 240_000;

/// Default command sent on each keepalive tick.
pub const DEFAULT_KEEPALIVE_COMMAND: &str = "version";

/// Default grace window for settled cache slots in milliseconds.
pub const DEFAULT_CACHE_GRACE_MS: u64 = 50;

/// Default channel capacity for the dispatcher and writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default timeout for connect plus greeting in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Anti-flood pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Whether writes are paced at all.
    pub enabled: bool,
    /// Minimum gap between two writes.
    pub interval_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_PACING_INTERVAL_MS,
        }
    }
}

/// Idle keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Whether the keepalive ticker runs.
    pub enabled: bool,
    /// Interval between ticks.
    pub interval_ms: u64,
    /// No-op command sent on each tick.
    pub command: String,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            command: DEFAULT_KEEPALIVE_COMMAND.to_string(),
        }
    }
}

/// Configuration consumed when a client is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Anti-flood pacing.
    pub pacing: PacingConfig,
    /// Idle keepalive.
    pub keepalive: KeepaliveConfig,
    /// How long a settled cached outcome is reused.
    pub cache_grace_ms: u64,
    /// Greeting lines expected before the first command.
    pub greeting_lines: usize,
    /// Expected first greeting line.
    pub server_identifier: String,
    /// Capacity of the request and writer channels.
    pub channel_capacity: usize,
    /// Timeout for TCP connect plus greeting.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pacing: PacingConfig::default(),
            keepalive: KeepaliveConfig::default(),
            cache_grace_ms: DEFAULT_CACHE_GRACE_MS,
            greeting_lines: DEFAULT_GREETING_LINES,
            server_identifier: DEFAULT_SERVER_IDENTIFIER.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Config`](crate::QueryError::Config) on invalid JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Cache grace window.
    #[inline]
    pub fn cache_grace(&self) -> Duration {
        Duration::from_millis(self.cache_grace_ms)
    }

    /// Keepalive interval.
    #[inline]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive.interval_ms)
    }

    /// Connect timeout.
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
