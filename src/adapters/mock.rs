//! Simulated serial port.
//!
//! [`MockAdapter`] is the session-facing half; [`MockDevice`] is the far end a test (or
//! the CLI's `--simulate` mode) drives: it feeds bytes as if the microcontroller sent
//! them, unplugs the cable, rejects writes and inspects what the host wrote.
//!
//! Bytes fed through the device are delivered synchronously on the calling thread,
//! which stands in for the real adapter's I/O thread.

use super::{ByteListener, PortHandle};
use crate::protocol::{BLINK_LED_ERROR, BLINK_LED_FINISH, STARTED};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Reaction to a host write: receives the device handle and the written text.
///
/// Must not replace the responder of the device it is called for.
pub type Responder = Box<dyn FnMut(&MockDevice, &str) + Send + 'static>;

#[derive(Default)]
struct MockState {
    open: AtomicBool,
    unplugged: AtomicBool,
    reject_open: AtomicBool,
    reject_writes: AtomicBool,
    listener: Mutex<Option<ByteListener>>,
    written: Mutex<Vec<Vec<u8>>>,
    greeting: Mutex<Option<String>>,
    responder: Mutex<Option<Responder>>,
}

/// Session-facing simulated port.
pub struct MockAdapter {
    port_name: String,
    baud_rate: u32,
    state: Arc<MockState>,
}

impl MockAdapter {
    /// Create a closed simulated port.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            state: Arc::new(MockState::default()),
        }
    }

    /// Handle to the simulated far end of this port.
    pub fn device(&self) -> MockDevice {
        MockDevice {
            state: Arc::clone(&self.state),
        }
    }
}

impl PortHandle for MockAdapter {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_listener(&self, listener: ByteListener) {
        *self.state.listener.lock() = Some(listener);
    }

    fn open(&self) -> bool {
        if self.state.reject_open.load(Ordering::Acquire)
            || self.state.unplugged.load(Ordering::Acquire)
        {
            return false;
        }
        self.state.open.store(true, Ordering::Release);

        let greeting = self.state.greeting.lock().clone();
        if let Some(line) = greeting {
            self.device().feed_line(&line);
        }
        true
    }

    fn close(&self) -> bool {
        self.state.open.store(false, Ordering::Release);
        true
    }

    fn is_connected(&self) -> bool {
        self.state.open.load(Ordering::Acquire) && !self.state.unplugged.load(Ordering::Acquire)
    }

    fn write(&self, bytes: &[u8]) -> bool {
        if !self.is_connected() || self.state.reject_writes.load(Ordering::Acquire) {
            return false;
        }
        self.state.written.lock().push(bytes.to_vec());

        let device = self.device();
        let text = String::from_utf8_lossy(bytes);
        if let Some(responder) = self.state.responder.lock().as_mut() {
            responder(&device, &text);
        }
        true
    }
}

/// The simulated microcontroller end of a [`MockAdapter`].
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<MockState>,
}

impl MockDevice {
    /// Deliver raw bytes to the host's listener. Dropped (returns false) while the port is closed.
    pub fn feed(&self, bytes: &[u8]) -> bool {
        if !self.state.open.load(Ordering::Acquire) || self.state.unplugged.load(Ordering::Acquire)
        {
            return false;
        }
        match self.state.listener.lock().as_mut() {
            Some(listener) => {
                listener(bytes);
                true
            }
            None => false,
        }
    }

    /// Deliver `line` followed by `\n`.
    pub fn feed_line(&self, line: &str) -> bool {
        self.feed(format!("{line}\n").as_bytes())
    }

    /// Simulate the device disappearing (cable pulled, board reset).
    pub fn unplug(&self) {
        self.state.unplugged.store(true, Ordering::Release);
    }

    /// Make subsequent `open` calls fail.
    pub fn set_reject_open(&self, reject: bool) {
        self.state.reject_open.store(reject, Ordering::Release);
    }

    /// Make subsequent writes fail at the transport.
    pub fn set_reject_writes(&self, reject: bool) {
        self.state.reject_writes.store(reject, Ordering::Release);
    }

    /// Line sent to the host every time the port is opened.
    pub fn set_greeting(&self, line: Option<&str>) {
        *self.state.greeting.lock() = line.map(str::to_string);
    }

    /// Install a reaction to host writes.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&MockDevice, &str) + Send + 'static,
    {
        *self.state.responder.lock() = Some(Box::new(responder));
    }

    /// Everything the host wrote, one entry per write call.
    pub fn written(&self) -> Vec<String> {
        self.state
            .written
            .lock()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Number of write calls that reached the device.
    pub fn write_count(&self) -> usize {
        self.state.written.lock().len()
    }

    /// Whether the host currently has the port open.
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    /// Behave like the LED-blink firmware: greet with `@STARTED` on open and answer
    /// `*BLINK_LED,n` with `@BLINK_LED,FINISH` after `n * step`, or `@BLINK_LED,ERROR`
    /// right away for a zero or unparsable count.
    pub fn emulate_blink_firmware(&self, step: Duration) {
        self.set_greeting(Some(STARTED));
        self.set_responder(move |device, written| {
            let Some(count) = written.trim().strip_prefix("*BLINK_LED,") else {
                return;
            };
            match count.trim().parse::<u32>() {
                Ok(times) if times > 0 => {
                    let device = device.clone();
                    thread::spawn(move || {
                        thread::sleep(step * times);
                        device.feed_line(BLINK_LED_FINISH);
                    });
                }
                _ => {
                    device.feed_line(BLINK_LED_ERROR);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn capture(adapter: &MockAdapter) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel();
        adapter.set_listener(Box::new(move |bytes| {
            let _ = tx.send(bytes.to_vec());
        }));
        rx
    }

    #[test]
    fn test_feed_requires_open_port() {
        let adapter = MockAdapter::new("SIM0", 9600);
        let rx = capture(&adapter);
        let device = adapter.device();

        assert!(!device.feed(b"early\n"));
        assert!(adapter.open());
        assert!(device.feed(b"@STARTED\n"));
        assert_eq!(rx.try_recv().unwrap(), b"@STARTED\n".to_vec());
    }

    #[test]
    fn test_unplug_breaks_connectivity_and_writes() {
        let adapter = MockAdapter::new("SIM0", 9600);
        assert!(adapter.open());
        assert!(adapter.is_connected());

        adapter.device().unplug();
        assert!(!adapter.is_connected());
        assert!(!adapter.write(b"*PING\n"));
        assert!(!adapter.open());
    }

    #[test]
    fn test_greeting_sent_on_open() {
        let adapter = MockAdapter::new("SIM0", 9600);
        let rx = capture(&adapter);
        adapter.device().set_greeting(Some("@STARTED"));
        assert!(adapter.open());
        assert_eq!(rx.try_recv().unwrap(), b"@STARTED\n".to_vec());
    }

    #[test]
    fn test_writes_recorded_and_rejectable() {
        let adapter = MockAdapter::new("SIM0", 9600);
        let device = adapter.device();
        assert!(adapter.open());
        assert!(adapter.write(b"*BLINK_LED,1\n"));
        device.set_reject_writes(true);
        assert!(!adapter.write(b"*BLINK_LED,2\n"));
        assert_eq!(device.written(), vec!["*BLINK_LED,1\n".to_string()]);
    }

    #[test]
    fn test_blink_firmware_rejects_zero_count() {
        let adapter = MockAdapter::new("SIM0", 9600);
        let rx = capture(&adapter);
        adapter.device().emulate_blink_firmware(Duration::from_millis(1));
        assert!(adapter.open());
        assert_eq!(rx.try_recv().unwrap(), b"@STARTED\n".to_vec());

        assert!(adapter.write(b"*BLINK_LED,0\n"));
        assert_eq!(rx.try_recv().unwrap(), b"@BLINK_LED,ERROR\n".to_vec());
    }

    #[test]
    fn test_blink_firmware_finishes_later() {
        let adapter = MockAdapter::new("SIM0", 9600);
        let rx = capture(&adapter);
        adapter.device().emulate_blink_firmware(Duration::from_millis(5));
        assert!(adapter.open());
        let _greeting = rx.recv().unwrap();

        assert!(adapter.write(b"*BLINK_LED,2\n"));
        let reply = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply, b"@BLINK_LED,FINISH\n".to_vec());
    }
}
