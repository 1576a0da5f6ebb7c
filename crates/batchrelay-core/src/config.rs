//! Operator settings and connection tuning, stored as TOML.
//!
//! ```toml
//! [general]
//! delay_secs = 2
//!
//! [ui]
//! placement = "floating"
//!
//! [connection]
//! probe_timeout_ms = 5000
//! max_attempts = 3
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub ui: UiSettings,
    pub connection: ConnectionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Pause between two tasks, in seconds.
    pub delay_secs: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self { delay_secs: 2 }
    }
}

/// Where the UI panel sits on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Floating,
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub placement: Placement,
}

/// Heartbeat and reconnection tuning for a supervised link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub probe_timeout_ms: u64,
    /// Poll interval while the UI is in the foreground.
    pub visible_interval_ms: u64,
    /// Poll interval while the UI is hidden.
    pub hidden_interval_ms: u64,
    /// Wait after a foreground transition before probing.
    pub settle_delay_ms: u64,
    /// Consecutive probe failures that trigger a rebuild.
    pub failure_threshold: u32,
    /// Failed rebuild cycles before the cool-down kicks in.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            visible_interval_ms: 30_000,
            hidden_interval_ms: 60_000,
            settle_delay_ms: 100,
            failure_threshold: 1,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
            cooldown_ms: 60_000,
        }
    }
}

impl ConnectionSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self, visible: bool) -> Duration {
        if visible {
            Duration::from_millis(self.visible_interval_ms)
        } else {
            Duration::from_millis(self.hidden_interval_ms)
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(self.backoff_max_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn inter_task_delay(&self) -> Duration {
        Duration::from_secs(self.general.delay_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.connection;
        let positive = [
            ("connection.probe_timeout_ms", c.probe_timeout_ms),
            ("connection.visible_interval_ms", c.visible_interval_ms),
            ("connection.hidden_interval_ms", c.hidden_interval_ms),
            ("connection.failure_threshold", u64::from(c.failure_threshold)),
            ("connection.max_attempts", u64::from(c.max_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        if c.backoff_max_ms < c.backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                field: "connection.backoff_max_ms".to_string(),
                message: "must not be smaller than backoff_base_ms".to_string(),
            });
        }
        Ok(())
    }
}
