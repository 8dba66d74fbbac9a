//! Unbounded blocking FIFO shared between the port's I/O thread and the session.
//!
//! One producer (the byte-arrival listener) offers decoded lines while one consumer
//! (`SerialSession::process_messages`) polls them with a bounded wait. The same queue
//! type carries relay actions to the session thread.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Thread-safe FIFO whose `poll` blocks up to a caller-supplied limit.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

/// Queue of decoded, trimmed, non-empty lines received from the device.
pub type MessageQueue = BlockingQueue<String>;

impl<T> BlockingQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append an item. Never blocks beyond the internal lock and never fails.
    pub fn offer(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Take the oldest item, waiting up to `max_wait` for one to arrive.
    pub fn poll(&self, max_wait: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(max_wait);
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut items, deadline).timed_out() {
                        return items.pop_front();
                    }
                }
                None => self.available.wait(&mut items),
            }
        }
    }

    /// Take the oldest item without waiting.
    pub fn try_poll(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Atomically remove and return everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Atomically discard everything currently queued. Returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
