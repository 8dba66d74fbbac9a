//! Port adapters
//!
//! A [`PortHandle`] owns one serial port: it opens and closes it, writes raw bytes and
//! delivers received bytes to a single registered listener on an adapter-owned I/O
//! thread. The session layer only talks to this trait, so the same engine runs against
//! real hardware ([`SerialAdapter`]) and the simulated device used by tests and the
//! `--simulate` CLI flag ([`MockAdapter`]).

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock::{MockAdapter, MockDevice};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

/// Callback invoked with each chunk of received bytes.
///
/// Runs on the adapter's I/O thread and must only do quick in-memory work.
pub type ByteListener = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A single serial port owned by one session.
pub trait PortHandle: Send + Sync {
    /// Name the port was resolved from (e.g. "/dev/ttyACM0", "COM5").
    fn port_name(&self) -> &str;

    /// Configured baud rate (8 data bits, 1 stop bit, no parity).
    fn baud_rate(&self) -> u32;

    /// Register the byte-arrival listener, replacing any previous one.
    fn set_listener(&self, listener: ByteListener);

    /// Open the port. Returns false if the underlying open call fails.
    fn open(&self) -> bool;

    /// Close the port. Idempotent.
    fn close(&self) -> bool;

    /// Live connectivity: false once the device has gone away, even if `open` succeeded.
    fn is_connected(&self) -> bool;

    /// Write raw bytes. False if not connected or the transport rejects the write.
    fn write(&self, bytes: &[u8]) -> bool;

    /// Open when `enabled`, close otherwise.
    fn set_enabled(&self, enabled: bool) -> bool {
        if enabled {
            self.open()
        } else {
            self.close()
        }
    }
}

/// Names of the serial ports the OS currently reports.
#[cfg(feature = "instrument_serial")]
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate serial ports");
            Vec::new()
        }
    }
}

/// Names of the serial ports the OS currently reports.
#[cfg(not(feature = "instrument_serial"))]
pub fn available_ports() -> Vec<String> {
    Vec::new()
}
