//! Configuration structures.
//!
//! Configuration is deserialized from JSON; every section falls back to its
//! defaults when omitted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::Result;

/// Default appspace grouping for channel identities.
pub const DEFAULT_APPSPACE: &str = "app.";

/// Default window a client waits for a message response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backbone startup configuration.
    #[serde(default)]
    pub backbone: BackboneConfig,

    /// Message protocol configuration.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Backbone startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackboneConfig {
    /// Upper bound on the whole layered startup. `None` waits indefinitely.
    #[serde(default, with = "humantime_serde")]
    pub startup_timeout: Option<Duration>,
}

/// Message protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// How long a client waits for a response before rejecting the call.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Appspace grouping applied to channel identities.
    pub appspace: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            appspace: DEFAULT_APPSPACE.to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
