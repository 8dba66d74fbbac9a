//! Serial adapter on the `serialport` crate.
//!
//! Opening the port spawns a reader thread on a cloned handle. The thread blocks in
//! `read` with a short timeout, hands every non-empty chunk to the registered listener
//! and exits on a non-timeout error, which is how a pulled USB cable shows up. Writes go
//! through the original handle, so the listener never contends with the writer.

use super::{available_ports, ByteListener, PortHandle};
use crate::error::{PanelError, PanelResult};
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read timeout of the I/O thread; also bounds how long `close` waits for it.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

type SharedListener = Arc<Mutex<Option<ByteListener>>>;

/// Serial port adapter for an RS-232 / USB-CDC microcontroller link.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyACM0", "COM5")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    read_timeout: Duration,

    /// Write side of the open port
    port: Mutex<Option<Box<dyn SerialPort>>>,

    listener: SharedListener,

    /// Cleared by the reader thread when the device stops answering reads
    connected: Arc<AtomicBool>,

    reader: Mutex<Option<ReaderThread>>,
}

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SerialAdapter {
    /// Resolve `port_name` without opening it.
    ///
    /// A name resolves if the OS lists it or if it is an existing device path; virtual
    /// ports such as ptys are often missing from the enumeration.
    ///
    /// # Errors
    /// `PanelError::PortNotFound` carrying the currently available port names.
    pub fn resolve(port_name: &str, baud_rate: u32) -> PanelResult<Self> {
        let available = available_ports();
        if !available.iter().any(|p| p == port_name) && !Path::new(port_name).exists() {
            return Err(PanelError::PortNotFound {
                port: port_name.to_string(),
                available,
            });
        }

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
            port: Mutex::new(None),
            listener: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        })
    }

    /// Override the I/O thread's read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    fn stop_reader(&self) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        reader.stop.store(true, Ordering::Release);
        // close() may be reached from the listener itself; never join our own thread.
        if reader.handle.thread().id() != thread::current().id() && reader.handle.join().is_err()
        {
            warn!(port = %self.port_name, "serial reader thread panicked");
        }
    }
}

impl PortHandle for SerialAdapter {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_listener(&self, listener: ByteListener) {
        *self.listener.lock() = Some(listener);
    }

    fn open(&self) -> bool {
        self.close();

        let port = match serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
        {
            Ok(port) => port,
            Err(e) => {
                warn!(port = %self.port_name, error = %e, "failed to open serial port");
                return false;
            }
        };

        let reader_port = match port.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(port = %self.port_name, error = %e, "failed to clone serial port for reading");
                return false;
            }
        };

        self.connected.store(true, Ordering::Release);
        *self.port.lock() = Some(port);

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = thread::Builder::new()
            .name(format!("serial-rx-{}", self.port_name))
            .spawn({
                let stop = Arc::clone(&stop);
                let listener = Arc::clone(&self.listener);
                let connected = Arc::clone(&self.connected);
                let port_name = self.port_name.clone();
                move || read_loop(reader_port, &port_name, &listener, &connected, &stop)
            });

        match spawned {
            Ok(handle) => {
                *self.reader.lock() = Some(ReaderThread { stop, handle });
                info!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
                true
            }
            Err(e) => {
                warn!(port = %self.port_name, error = %e, "failed to spawn serial reader thread");
                self.connected.store(false, Ordering::Release);
                *self.port.lock() = None;
                false
            }
        }
    }

    fn close(&self) -> bool {
        self.stop_reader();
        self.connected.store(false, Ordering::Release);
        if self.port.lock().take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
        true
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let mut port = self.port.lock();
        let alive = match port.as_ref() {
            Some(port) => port.bytes_to_read().is_ok(),
            None => false,
        };
        if !alive {
            self.connected.store(false, Ordering::Release);
            *port = None;
        }
        alive
    }

    fn write(&self, bytes: &[u8]) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let mut guard = self.port.lock();
        let Some(port) = guard.as_mut() else {
            return false;
        };

        match port.write_all(bytes).and_then(|()| port.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!(port = %self.port_name, error = %e, "serial write failed");
                false
            }
        }
    }
}

impl Drop for SerialAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    port_name: &str,
    listener: &Mutex<Option<ByteListener>>,
    connected: &AtomicBool,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if let Some(listener) = listener.lock().as_mut() {
                    listener(&buf[..n]);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                warn!(port = %port_name, error = %e, "serial read failed, marking port disconnected");
                connected.store(false, Ordering::Release);
                break;
            }
        }
    }
    debug!(port = %port_name, "serial reader thread exiting");
}
