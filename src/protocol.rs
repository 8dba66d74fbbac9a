//! Wire protocol spoken by the LED-blink firmware.
//!
//! Host to device: `*<COMMAND>[,<arg>...]\n`, e.g. `*BLINK_LED,5\n`.
//! Device to host: `@<EVENT>[,<status>...]`, e.g. `@STARTED`, `@BLINK_LED,FINISH`.
//!
//! Replies are matched by substring containment on the raw line, the same way the
//! firmware's own test harness does it. [`Event::parse`] exists for display and logging
//! only.

use crate::error::CommandError;
use crate::session::SerialSession;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Prefix of every host command line.
pub const COMMAND_PREFIX: char = '*';
/// Prefix of every device event line.
pub const EVENT_PREFIX: char = '@';

/// Sent once by the firmware after reset.
pub const STARTED: &str = "@STARTED";
/// Blink sequence completed.
pub const BLINK_LED_FINISH: &str = "@BLINK_LED,FINISH";
/// Firmware refused or aborted the blink sequence.
pub const BLINK_LED_ERROR: &str = "@BLINK_LED,ERROR";

/// Blink counts the panel offers.
pub const BLINK_COUNT_RANGE: RangeInclusive<u32> = 1..=20;

/// Commands understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Blink the on-board LED `n` times.
    BlinkLed(u32),
}

impl Command {
    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::BlinkLed(_) => "BLINK_LED",
        }
    }

    /// Check arguments before anything is sent.
    ///
    /// # Errors
    /// `CommandError::InvalidArgument` for a blink count outside [`BLINK_COUNT_RANGE`].
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Command::BlinkLed(times) if !BLINK_COUNT_RANGE.contains(times) => {
                Err(CommandError::InvalidArgument(format!(
                    "blink count {} out of range ({}-{})",
                    times,
                    BLINK_COUNT_RANGE.start(),
                    BLINK_COUNT_RANGE.end()
                )))
            }
            Command::BlinkLed(_) => Ok(()),
        }
    }

    /// Full wire line including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::BlinkLed(times) => write!(f, "{COMMAND_PREFIX}{},{times}", self.name()),
        }
    }
}

/// A device event split into name and comma-separated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name without the `@` prefix.
    pub name: String,
    /// Remaining comma-separated fields.
    pub fields: Vec<String>,
}

impl Event {
    /// Parse an `@NAME[,field...]` line; `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim().strip_prefix(EVENT_PREFIX)?;
        let mut parts = body.split(',').map(str::trim);
        let name = parts.next().filter(|name| !name.is_empty())?;
        Some(Self {
            name: name.to_string(),
            fields: parts.map(str::to_string).collect(),
        })
    }
}

/// Wait for the firmware's startup marker.
pub fn await_startup(session: &SerialSession, timeout: Duration) -> bool {
    session
        .wait_for(timeout, |line| line.contains(STARTED).then_some(()))
        .is_some()
}

/// Blink the LED `times` times and wait for the firmware to finish.
///
/// # Errors
/// `InvalidArgument` for a count outside the panel's range, `DeviceError` when the
/// firmware answers `@BLINK_LED,ERROR`, plus the exchange errors of
/// [`SerialSession::exchange`].
pub fn blink_led(
    session: &SerialSession,
    times: u32,
    timeout: Duration,
) -> Result<(), CommandError> {
    let command = Command::BlinkLed(times);
    command.validate()?;

    session.exchange(&command.to_line(), timeout, |line| {
        if line.contains(BLINK_LED_FINISH) {
            Some(Ok(()))
        } else if line.contains(BLINK_LED_ERROR) {
            Some(Err(CommandError::DeviceError(line.to_string())))
        } else {
            None
        }
    })?
}
