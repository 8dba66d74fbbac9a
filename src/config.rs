//! Configuration loading using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (COM5 at 9600 baud, 5 s startup wait, 10 s command wait)
//! 2. `mcu-panel.toml` (or the path given on the command line); a missing file is fine
//! 3. Environment variables prefixed with `MCU_PANEL_`, using `__` between sections
//!
//! ```text
//! MCU_PANEL_SERIAL__PORT=/dev/ttyACM0
//! MCU_PANEL_SERIAL__BAUD_RATE=115200
//! MCU_PANEL_TIMEOUTS__COMMAND_MS=20000
//! MCU_PANEL_LOGGING__LEVEL=debug
//! ```

use crate::worker::WorkerSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level panel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PanelConfig {
    /// Which port to talk to
    #[serde(default)]
    pub serial: SerialConfig,
    /// Protocol waits
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Diagnostics output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name or device path
    pub port: String,
    /// Baud rate; framing is always 8N1
    pub baud_rate: u32,
    /// Read timeout of the port's I/O thread, which also bounds how long closing waits
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "COM5".to_string(),
            baud_rate: 9600,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Protocol timeouts, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long to wait for `@STARTED` after opening the port
    #[serde(default = "default_startup_ms")]
    pub startup_ms: u64,
    /// How long to wait for a command's reply
    #[serde(default = "default_command_ms")]
    pub command_ms: u64,
    /// Queue poll granularity while waiting for replies
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the session thread waits for queued work between connectivity checks
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_ms: default_startup_ms(),
            command_ms: default_command_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_wait_ms: default_idle_wait_ms(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_startup_ms() -> u64 {
    5_000
}

fn default_command_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_idle_wait_ms() -> u64 {
    100
}

impl PanelConfig {
    /// File read by [`PanelConfig::load`].
    pub const DEFAULT_PATH: &'static str = "mcu-panel.toml";

    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "MCU_PANEL_";

    /// Load from `mcu-panel.toml` in the working directory plus the environment.
    ///
    /// # Errors
    /// Returns a ConfigError if extraction or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::DEFAULT_PATH)
    }

    /// Load from a specific TOML file plus the environment.
    ///
    /// # Errors
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "serial.port cannot be empty".to_string(),
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }

        if !(1..=1000).contains(&self.serial.read_timeout_ms) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid serial.read_timeout_ms {}. Must be 1-1000",
                self.serial.read_timeout_ms
            )));
        }

        if !(1..=1000).contains(&self.timeouts.poll_interval_ms) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid timeouts.poll_interval_ms {}. Must be 1-1000",
                self.timeouts.poll_interval_ms
            )));
        }

        if self.timeouts.startup_ms == 0 || self.timeouts.command_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.startup_ms and timeouts.command_ms must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Read timeout of the serial adapter's I/O thread.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    /// Wait for the startup marker.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.startup_ms)
    }

    /// Wait for a command reply.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.command_ms)
    }

    /// Queue poll granularity.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.poll_interval_ms)
    }

    /// Settings for a [`crate::worker::SessionWorker`].
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            startup_timeout: self.startup_timeout(),
            command_timeout: self.command_timeout(),
            idle_wait: Duration::from_millis(self.timeouts.idle_wait_ms),
        }
    }
}
