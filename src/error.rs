//! Error types for the serial control panel.
//!
//! Two enums cover the whole crate:
//!
//! - **`PanelError`**: construction-time and setup failures. A port name that does not
//!   resolve (`PortNotFound`, which carries the currently available port names), a port
//!   that resolved but would not open (`Connection`), I/O and configuration errors.
//!   These are returned as `Err` from constructors and loaders and are never swallowed.
//! - **`CommandError`**: failures of the purge-send-wait helpers built on top of the
//!   session (`SerialSession::exchange` and the protocol operations).
//!
//! The core session operations themselves (`send_command`, `process_messages`,
//! `terminate`) keep boolean / outcome signalling: a rejected write, a sticky fault or a
//! soft timeout is reported as a value the caller must check, not as an error.

use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the panel error type.
pub type PanelResult<T> = std::result::Result<T, PanelError>;

/// Setup-time errors: resolving, opening and configuring a serial session.
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Port '{port}' is not a valid serial port. Valid ports: {}", .available.join(", "))]
    PortNotFound {
        /// The name that failed to resolve.
        port: String,
        /// Port names that were available when resolution failed.
        available: Vec<String>,
    },

    #[error("Error connecting to serial port '{port}': {reason}")]
    Connection {
        /// Port that failed to open.
        port: String,
        /// Why the connection was refused.
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

/// Failures of a command exchange (purge, send, wait for a matching reply).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Serial session is not ready")]
    NotReady,

    #[error("Failed to write '{0}' to the serial port")]
    WriteFailed(String),

    #[error("Device reported an error: {0}")]
    DeviceError(String),

    #[error("No reply to '{command}' within {timeout:?}")]
    Timeout {
        /// The command line that went unanswered (without terminator).
        command: String,
        /// How long the session waited.
        timeout: Duration,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
