//! Host-side session layer for a serial-attached microcontroller panel.
//!
//! The host sends `*COMMAND[,args]` lines and the firmware answers with `@EVENT[,status]`
//! lines over an 8N1 serial link. The crate is organised bottom-up:
//!
//! - [`adapters`]: the [`PortHandle`] seam, a `serialport` implementation and a
//!   scriptable mock device
//! - [`framing`]: byte chunks to complete lines
//! - [`queue`]: the blocking line queue between the I/O thread and protocol code
//! - [`session`]: [`SerialSession`], the send/poll protocol engine
//! - [`protocol`]: the firmware's command and event vocabulary
//! - [`relay`] and [`worker`]: the dedicated session thread and its work queue
//! - [`config`]: layered configuration via figment

pub mod adapters;
pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod session;
pub mod stopwatch;
pub mod worker;

pub use adapters::{ByteListener, MockAdapter, MockDevice, PortHandle};
pub use config::PanelConfig;
pub use error::{CommandError, PanelError, PanelResult};
pub use framing::LineFramer;
pub use queue::MessageQueue;
pub use session::{Interrupt, PollOutcome, SerialSession, SessionState};
pub use stopwatch::Stopwatch;
pub use worker::{SessionEvent, SessionWorker, WorkerSettings};

#[cfg(feature = "instrument_serial")]
pub use adapters::SerialAdapter;

/// Baud rate the stock firmware uses.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Open `port_name` at [`DEFAULT_BAUD_RATE`].
///
/// # Errors
/// See [`SerialSession::connect`].
#[cfg(feature = "instrument_serial")]
pub fn connect(port_name: &str) -> PanelResult<SerialSession> {
    SerialSession::connect(port_name, DEFAULT_BAUD_RATE)
}

/// Serial ports the operating system currently reports.
pub fn enumerate_available_ports() -> Vec<String> {
    adapters::available_ports()
}
