//! Dedicated session thread.
//!
//! The worker owns the session for its whole life: it connects, waits for the
//! firmware's startup marker, then services the [`CommandRelay`] until it is stopped or
//! the connection drops, and finally terminates the session. Everything a user
//! interface needs to render (controls enabled or not, error dialogs) arrives as
//! [`SessionEvent`]s through the sink passed to [`SessionWorker::spawn`]; the sink is
//! called on the worker thread.

use crate::error::{PanelError, PanelResult};
use crate::protocol;
use crate::relay::CommandRelay;
use crate::session::SerialSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing used by the session thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Wait for `@STARTED` after connecting.
    pub startup_timeout: Duration,
    /// Wait for a command reply.
    pub command_timeout: Duration,
    /// Relay wait between connectivity checks.
    pub idle_wait: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            idle_wait: Duration::from_millis(100),
        }
    }
}

/// Something the presentation layer may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The worker is opening the port.
    Connecting {
        /// Port being opened.
        port: String,
    },
    /// The port could not be resolved or opened.
    ConnectFailed {
        /// Port that failed.
        port: String,
        /// Error text, suitable for a dialog.
        reason: String,
    },
    /// The firmware never sent its startup marker.
    StartupTimeout {
        /// Port that stayed silent.
        port: String,
        /// How long the worker waited.
        waited: Duration,
    },
    /// Startup marker seen; commands are accepted.
    Ready {
        /// Connected port.
        port: String,
    },
    /// A queued command began executing.
    CommandStarted {
        /// Wire form of the command, without terminator.
        command: String,
    },
    /// The firmware confirmed the command.
    CommandSucceeded {
        /// Wire form of the command.
        command: String,
    },
    /// The command failed or went unanswered.
    CommandFailed {
        /// Wire form of the command.
        command: String,
        /// Error text.
        reason: String,
    },
    /// The device disappeared while the session was running.
    ConnectionLost {
        /// Port that dropped.
        port: String,
    },
    /// The worker has finished and released the port.
    Terminated {
        /// Released port.
        port: String,
    },
}

type EventSink = Arc<dyn Fn(SessionEvent) + Send + Sync + 'static>;

/// Handle to a running session thread.
pub struct SessionWorker {
    relay: Arc<CommandRelay>,
    running: Arc<AtomicBool>,
    settings: WorkerSettings,
    on_event: EventSink,
    handle: Option<JoinHandle<()>>,
}

impl SessionWorker {
    /// Start the session thread.
    ///
    /// `connector` runs on the new thread and produces the session (real port, or a
    /// simulated one in tests). `port` only labels events emitted before the session
    /// exists.
    ///
    /// # Errors
    /// `PanelError::Io` if the thread cannot be spawned.
    pub fn spawn<C, E>(
        port: &str,
        settings: WorkerSettings,
        connector: C,
        on_event: E,
    ) -> PanelResult<Self>
    where
        C: FnOnce() -> PanelResult<SerialSession> + Send + 'static,
        E: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let relay = Arc::new(CommandRelay::new());
        let running = Arc::new(AtomicBool::new(true));
        let on_event: EventSink = Arc::new(on_event);

        let handle = thread::Builder::new()
            .name(format!("session-{port}"))
            .spawn({
                let relay = Arc::clone(&relay);
                let running = Arc::clone(&running);
                let on_event = Arc::clone(&on_event);
                let port = port.to_string();
                move || run_session(&port, settings, connector, &relay, &running, on_event.as_ref())
            })
            .map_err(PanelError::Io)?;

        Ok(Self {
            relay,
            running,
            settings,
            on_event,
            handle: Some(handle),
        })
    }

    /// Queue an arbitrary action for the session thread. False if no session is active.
    pub fn submit<F>(&self, action: F) -> bool
    where
        F: FnOnce(&SerialSession) + Send + 'static,
    {
        self.relay.submit(action)
    }

    /// Queue a blink of `times`, reporting progress as command events.
    ///
    /// Returns false if no session is active; the request is dropped in that case.
    pub fn request_blink(&self, times: u32) -> bool {
        let on_event = Arc::clone(&self.on_event);
        let timeout = self.settings.command_timeout;
        self.relay.submit(move |session| {
            let command = protocol::Command::BlinkLed(times).to_string();
            on_event(SessionEvent::CommandStarted {
                command: command.clone(),
            });
            match protocol::blink_led(session, times, timeout) {
                Ok(()) => on_event(SessionEvent::CommandSucceeded { command }),
                Err(e) => {
                    warn!(%command, error = %e, "command failed");
                    on_event(SessionEvent::CommandFailed {
                        command,
                        reason: e.to_string(),
                    });
                }
            }
        })
    }

    /// Whether the session accepts commands right now.
    pub fn is_active(&self) -> bool {
        self.relay.is_active()
    }

    /// Whether the session thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the session thread to finish after its current action.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop and wait for the session thread to release the port.
    pub fn join(mut self) {
        self.stop();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("session thread panicked");
            }
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.stop();
        self.join_thread();
    }
}

fn run_session<C>(
    port: &str,
    settings: WorkerSettings,
    connector: C,
    relay: &CommandRelay,
    running: &AtomicBool,
    on_event: &(dyn Fn(SessionEvent) + Send + Sync),
) where
    C: FnOnce() -> PanelResult<SerialSession>,
{
    on_event(SessionEvent::Connecting {
        port: port.to_string(),
    });

    let session = match connector() {
        Ok(session) => session,
        Err(e) => {
            error!(%port, error = %e, "failed to connect");
            running.store(false, Ordering::Release);
            on_event(SessionEvent::ConnectFailed {
                port: port.to_string(),
                reason: e.to_string(),
            });
            return;
        }
    };
    let port = session.port_name().to_string();

    if protocol::await_startup(&session, settings.startup_timeout) {
        relay.activate();
        info!(%port, "device started");
        on_event(SessionEvent::Ready { port: port.clone() });

        while running.load(Ordering::Acquire) {
            if !session.is_ready() {
                on_event(SessionEvent::ConnectionLost { port: port.clone() });
                break;
            }
            relay.run_pending(&session, settings.idle_wait);
        }
        relay.deactivate();
    } else {
        warn!(%port, waited = ?settings.startup_timeout, "no startup message from device");
        on_event(SessionEvent::StartupTimeout {
            port: port.clone(),
            waited: settings.startup_timeout,
        });
    }

    running.store(false, Ordering::Release);
    session.terminate();
    on_event(SessionEvent::Terminated { port });
}
