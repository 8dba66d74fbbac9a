//! Serial session: the protocol engine between the host and the microcontroller.
//!
//! A [`SerialSession`] owns one [`PortHandle`] and one [`MessageQueue`]. At
//! construction it registers a listener that runs every received chunk through a
//! [`LineFramer`] (whose carry lives only inside that listener) and offers the
//! completed lines to the queue. Protocol code then works in two explicit steps:
//!
//! 1. [`SerialSession::send_command`] writes a command line, optionally purging the
//!    queue first so replies to earlier commands cannot satisfy the next wait.
//! 2. [`SerialSession::process_messages`] polls the queue in bounded steps and hands
//!    each line to a handler until the handler raises the [`Interrupt`] or the timeout
//!    elapses.
//!
//! [`SerialSession::exchange`] combines both steps (always purging) for callers that
//! just need "send this, wait for that".
//!
//! # Lifecycle
//!
//! ```text
//! with_port/connect ──ok──▶ Ready ──connectivity lost──▶ Faulted (sticky)
//!        │                    │                              │
//!        └─err─▶ (no session) └────────terminate()───────────┴──▶ Terminated
//! ```
//!
//! # Concurrency
//!
//! Lines are produced on the port's I/O thread and consumed by whichever thread calls
//! `process_messages`. Only one `process_messages` (or `wait_for` / `exchange`) call
//! may be in flight per session; overlapping calls would steal each other's lines.
//! `terminate` does not interrupt a wait in progress.

use crate::adapters::{ByteListener, PortHandle};
use crate::error::{CommandError, PanelError, PanelResult};
use crate::framing::LineFramer;
use crate::queue::MessageQueue;
use crate::stopwatch::Stopwatch;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default poll granularity of [`SerialSession::process_messages`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port open and connected.
    Ready,
    /// Connectivity loss was observed; the session stays unusable.
    Faulted,
    /// `terminate` closed the port.
    Terminated,
}

/// How a [`SerialSession::process_messages`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The handler raised the interrupt.
    Interrupted,
    /// The timeout elapsed first. Not an error by itself.
    TimedOut,
}

/// Cooperative stop signal shared by a polling loop and its line handler.
#[derive(Debug, Default)]
pub struct Interrupt(AtomicBool);

impl Interrupt {
    /// A lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop after the current line.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Lower the flag.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether a stop was requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Last send/receive instant, shared with the byte listener.
#[derive(Debug)]
struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self) {
        self.last_ms.store(self.now_ms(), Ordering::Release);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

/// A connected serial session speaking the line protocol.
pub struct SerialSession {
    port: Box<dyn PortHandle>,
    messages: Arc<MessageQueue>,
    activity: Arc<ActivityClock>,
    fault: AtomicBool,
    terminated: AtomicBool,
    poll_interval: Duration,
}

impl SerialSession {
    /// Resolve and open a real serial port at `baud_rate` (8N1).
    ///
    /// # Errors
    /// `PortNotFound` if the name does not resolve, `Connection` if the port will not open.
    #[cfg(feature = "instrument_serial")]
    pub fn connect(port_name: &str, baud_rate: u32) -> PanelResult<Self> {
        let adapter = crate::adapters::SerialAdapter::resolve(port_name, baud_rate)?;
        Self::with_port(Box::new(adapter))
    }

    /// Build a session on an already-resolved port handle and open it.
    ///
    /// The line listener is registered before the port opens so nothing the device
    /// sends on connect is lost.
    ///
    /// # Errors
    /// `PanelError::Connection` if the port fails to open or reports not connected.
    pub fn with_port(port: Box<dyn PortHandle>) -> PanelResult<Self> {
        let messages = Arc::new(MessageQueue::new());
        let activity = Arc::new(ActivityClock::new());

        port.set_listener(line_listener(Arc::clone(&messages), Arc::clone(&activity)));

        if !port.set_enabled(true) {
            return Err(PanelError::Connection {
                port: port.port_name().to_string(),
                reason: "port failed to open".to_string(),
            });
        }
        if !port.is_connected() {
            return Err(PanelError::Connection {
                port: port.port_name().to_string(),
                reason: "port reports not connected after open".to_string(),
            });
        }

        info!(port = %port.port_name(), baud = port.baud_rate(), "serial session ready");
        Ok(Self {
            port,
            messages,
            activity,
            fault: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Change the poll granularity used by `process_messages` and `wait_for_idle`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port.port_name()
    }

    /// Baud rate of the underlying port.
    pub fn baud_rate(&self) -> u32 {
        self.port.baud_rate()
    }

    /// Poll granularity in use.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// True while the port is connected and no fault has been seen.
    ///
    /// The first call that observes a disconnected port latches the fault; from then on
    /// this returns false for the rest of the session's life.
    pub fn is_ready(&self) -> bool {
        if self.fault.load(Ordering::Acquire) {
            return false;
        }
        if !self.port.is_connected() {
            if !self.fault.swap(true, Ordering::AcqRel) && !self.terminated.load(Ordering::Acquire)
            {
                warn!(port = %self.port_name(), "serial connection lost, session faulted");
            }
            return false;
        }
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.terminated.load(Ordering::Acquire) {
            SessionState::Terminated
        } else if self.is_ready() {
            SessionState::Ready
        } else {
            SessionState::Faulted
        }
    }

    /// Latch the fault bit as if connectivity loss had been observed.
    pub fn mark_faulted(&self) {
        self.fault.store(true, Ordering::Release);
    }

    /// Write a command line.
    ///
    /// Returns false without side effects when the session is not ready. With `purge`
    /// the queue is cleared first, dropping any replies still waiting there. An empty
    /// `command` only purges and touches the activity clock. Does not wait for a reply.
    pub fn send_command(&self, purge: bool, command: &str) -> bool {
        if !self.is_ready() {
            return false;
        }

        if purge {
            let dropped = self.messages.clear();
            if dropped > 0 {
                debug!(dropped, "purged stale messages before send");
            }
        }

        self.activity.touch();

        if command.is_empty() {
            return true;
        }

        debug!(command = %command.trim_end(), "tx");
        if !self.port.write(command.as_bytes()) {
            warn!(port = %self.port_name(), command = %command.trim_end(), "command write rejected");
            return false;
        }
        true
    }

    /// Feed arriving lines to `handler` until it raises `interrupt` or `timeout` elapses.
    ///
    /// `interrupt` is lowered on entry. Each queue poll waits at most one poll interval
    /// (clamped to the time left), so the call returns within one interval of the
    /// deadline and promptly after the handler raises the flag.
    pub fn process_messages<F>(
        &self,
        interrupt: &Interrupt,
        timeout: Duration,
        mut handler: F,
    ) -> PollOutcome
    where
        F: FnMut(&str),
    {
        interrupt.reset();
        let stopwatch = Stopwatch::start();

        while !interrupt.is_set() && !stopwatch.has_elapsed(timeout) {
            let wait = self.poll_interval.min(stopwatch.remaining(timeout));
            if let Some(line) = self.messages.poll(wait) {
                handler(&line);
            }
        }

        if interrupt.is_set() {
            PollOutcome::Interrupted
        } else {
            PollOutcome::TimedOut
        }
    }

    /// Wait for the first line `matcher` maps to `Some`, or `None` on timeout.
    pub fn wait_for<T, F>(&self, timeout: Duration, mut matcher: F) -> Option<T>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let interrupt = Interrupt::new();
        let mut matched = None;
        self.process_messages(&interrupt, timeout, |line| {
            if let Some(value) = matcher(line) {
                matched = Some(value);
                interrupt.set();
            }
        });
        matched
    }

    /// Purge, send `command`, then wait for a reply `matcher` accepts.
    ///
    /// # Errors
    /// `NotReady` if the session is faulted or terminated, `WriteFailed` if the port
    /// rejected the write, `Timeout` if no matching line arrived in time.
    pub fn exchange<T, F>(
        &self,
        command: &str,
        timeout: Duration,
        matcher: F,
    ) -> Result<T, CommandError>
    where
        F: FnMut(&str) -> Option<T>,
    {
        if !self.is_ready() {
            return Err(CommandError::NotReady);
        }
        if !self.send_command(true, command) {
            return Err(CommandError::WriteFailed(command.trim_end().to_string()));
        }
        self.wait_for(timeout, matcher).ok_or_else(|| CommandError::Timeout {
            command: command.trim_end().to_string(),
            timeout,
        })
    }

    /// Block until nothing has been sent or received for at least `setpoint`.
    ///
    /// Has no timeout of its own: a device that never goes quiet blocks forever.
    pub fn wait_for_idle(&self, setpoint: Duration) {
        while self.activity.idle_for() < setpoint {
            thread::sleep(self.poll_interval);
        }
    }

    /// Time since the last send or received line.
    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    /// Lines received and not yet consumed.
    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    /// Close the port. Returns false if the session was already faulted or terminated.
    pub fn terminate(&self) -> bool {
        if self.terminated.load(Ordering::Acquire) || !self.is_ready() {
            return false;
        }
        self.terminated.store(true, Ordering::Release);
        let closed = self.port.set_enabled(false);
        info!(port = %self.port_name(), "serial session terminated");
        closed
    }
}

fn line_listener(messages: Arc<MessageQueue>, activity: Arc<ActivityClock>) -> ByteListener {
    let mut framer = LineFramer::new();
    Box::new(move |chunk: &[u8]| {
        for line in framer.push(chunk) {
            trace!(%line, "rx");
            activity.touch();
            messages.offer(line);
        }
    })
}
