//! Runtime configuration using Figment.
//!
//! There is no configuration file. Settings are layered from:
//! 1. Built-in defaults ([`MexConfig::default`])
//! 2. Environment variables prefixed with `MEX_` (e.g. `MEX_PORT=/dev/ttyUSB3`)
//!
//! A `toml::Value` table (as handed over by an instrument host) can be used
//! instead via [`MexConfig::from_value`].
//!
//! # Example
//! ```no_run
//! use optogama_mex::config::MexConfig;
//!
//! let config = MexConfig::load()?;
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::serial::{SerialConfig, DEFAULT_PORT};
use crate::store::STATUS_DEBOUNCE;
use anyhow::{anyhow, Context, Result};
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one MEX beam expander.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MexConfig {
    /// Serial port path (e.g., "/dev/ttyMEX")
    #[serde(default = "default_port")]
    pub port: String,
    /// Minimum age of the status snapshot before it is re-queried (default: 200)
    #[serde(default = "default_status_debounce_ms")]
    pub status_debounce_ms: u64,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (compact, pretty, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_status_debounce_ms() -> u64 {
    STATUS_DEBOUNCE.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for MexConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            status_debounce_ms: default_status_debounce_ms(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl MexConfig {
    /// Load defaults overridden by `MEX_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::figment()
            .extract()
            .context("Invalid MEX configuration")
    }

    /// The provider stack used by [`MexConfig::load`].
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(MexConfig::default())).merge(Env::prefixed("MEX_"))
    }

    /// Build from a `toml::Value` table; missing keys take their defaults.
    pub fn from_value(value: toml::Value) -> Result<Self> {
        value.try_into().context("Invalid MEX config")
    }

    /// Check semantic constraints after loading.
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(anyhow!("Serial port must not be empty"));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        crate::logging::parse_log_format(&self.log_format).map_err(|e| anyhow!(e))?;
        Ok(())
    }

    /// Status debounce window as a [`Duration`].
    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    /// Serial settings for [`crate::serial::Transport::open`].
    ///
    /// Only the port comes from configuration; the line settings and the read
    /// timeout are fixed by the device.
    pub fn serial(&self) -> SerialConfig {
        SerialConfig::new(self.port.clone())
    }
}
