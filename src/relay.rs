//! Cross-thread command relay.
//!
//! Foreground code (a UI event handler, a stdin reader) queues actions; the session
//! thread runs them one after another with access to the session. Submissions are
//! refused while no session is active.

use crate::queue::BlockingQueue;
use crate::session::SerialSession;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Work executed on the session thread.
pub type Action = Box<dyn FnOnce(&SerialSession) + Send + 'static>;

/// Single-consumer queue of actions for the session thread.
#[derive(Default)]
pub struct CommandRelay {
    actions: BlockingQueue<Action>,
    /// Held across the check-and-offer in `submit` and the flip-and-clear in
    /// `deactivate`, so an accepted action is either run or counted as dropped.
    active: Mutex<bool>,
}

impl CommandRelay {
    /// An inactive relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accepting submissions.
    pub fn activate(&self) {
        *self.active.lock() = true;
    }

    /// Stop accepting submissions and drop everything still queued.
    pub fn deactivate(&self) -> usize {
        let dropped = {
            let mut active = self.active.lock();
            *active = false;
            self.actions.clear()
        };
        if dropped > 0 {
            debug!(dropped, "dropped queued actions on relay shutdown");
        }
        dropped
    }

    /// Whether a session is accepting work.
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    /// Queue `action`. Returns false, dropping it, when no session is active.
    pub fn submit<F>(&self, action: F) -> bool
    where
        F: FnOnce(&SerialSession) + Send + 'static,
    {
        let active = self.active.lock();
        if !*active {
            return false;
        }
        self.actions.offer(Box::new(action));
        true
    }

    /// Actions waiting to run.
    pub fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Wait up to `max_wait` for work, then run everything queued at that point in FIFO
    /// order. Returns the number of actions run.
    pub fn run_pending(&self, session: &SerialSession, max_wait: Duration) -> usize {
        let Some(first) = self.actions.poll(max_wait) else {
            return 0;
        };
        first(session);

        let rest = self.actions.drain();
        let ran = 1 + rest.len();
        for action in rest {
            action(session);
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn session() -> SerialSession {
        SerialSession::with_port(Box::new(MockAdapter::new("SIM0", 9600))).unwrap()
    }

    #[test]
    fn test_submit_rejected_while_inactive() {
        let relay = CommandRelay::new();
        assert!(!relay.submit(|_| {}));
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_run_pending_in_fifo_order() {
        let relay = CommandRelay::new();
        relay.activate();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            assert!(relay.submit(move |_| order.lock().push(i)));
        }

        let session = session();
        assert_eq!(relay.run_pending(&session, Duration::from_millis(10)), 4);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(relay.run_pending(&session, Duration::from_millis(10)), 0);
    }

    #[test]
    fn test_actions_see_the_session() {
        let relay = CommandRelay::new();
        relay.activate();
        let adapter = MockAdapter::new("SIM0", 9600);
        let device = adapter.device();
        let session = SerialSession::with_port(Box::new(adapter)).unwrap();

        assert!(relay.submit(|session| {
            session.send_command(true, "*BLINK_LED,2\n");
        }));
        relay.run_pending(&session, Duration::from_millis(10));
        assert_eq!(device.written(), vec!["*BLINK_LED,2\n".to_string()]);
    }

    #[test]
    fn test_deactivate_drops_queued_actions() {
        let relay = CommandRelay::new();
        relay.activate();
        assert!(relay.submit(|_| {}));
        assert!(relay.submit(|_| {}));
        assert_eq!(relay.deactivate(), 2);
        assert!(!relay.is_active());
        assert!(!relay.submit(|_| {}));
    }

    #[test]
    fn test_accepted_actions_are_never_lost_on_deactivate() {
        for _ in 0..20 {
            let relay = Arc::new(CommandRelay::new());
            relay.activate();

            let submitter = {
                let relay = Arc::clone(&relay);
                thread::spawn(move || {
                    let mut accepted = 0usize;
                    while relay.submit(|_| {}) {
                        accepted += 1;
                        thread::yield_now();
                    }
                    accepted
                })
            };

            thread::sleep(Duration::from_millis(2));
            let dropped = relay.deactivate();
            let accepted = submitter.join().unwrap();

            assert_eq!(accepted, dropped);
            assert_eq!(relay.pending(), 0);
        }
    }

    #[test]
    fn test_run_pending_counts_what_it_ran() {
        let relay = CommandRelay::new();
        relay.activate();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            assert!(relay.submit(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(relay.run_pending(&session(), Duration::from_millis(10)), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}
