//! Elapsed-time measurement for timeout enforcement.

use std::time::{Duration, Instant};

/// Monotonic stopwatch started at construction.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Reset the start point to now.
    pub fn restart(&mut self) {
        self.started = Instant::now();
    }

    /// Time since the stopwatch was (re)started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// True once at least `limit` has passed.
    pub fn has_elapsed(&self, limit: Duration) -> bool {
        self.elapsed() >= limit
    }

    /// Time left until `limit`, zero when already past it.
    pub fn remaining(&self, limit: Duration) -> Duration {
        limit.saturating_sub(self.elapsed())
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_elapsed_grows() {
        let sw = Stopwatch::start();
        thread::sleep(Duration::from_millis(20));
        assert!(sw.elapsed() >= Duration::from_millis(20));
        assert!(sw.elapsed_ms() >= 20);
    }

    #[test]
    fn test_remaining_saturates() {
        let sw = Stopwatch::start();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(sw.remaining(Duration::from_millis(5)), Duration::ZERO);
        assert!(sw.has_elapsed(Duration::from_millis(5)));
        assert!(!sw.has_elapsed(Duration::from_secs(60)));
    }

    #[test]
    fn test_restart() {
        let mut sw = Stopwatch::start();
        thread::sleep(Duration::from_millis(30));
        sw.restart();
        assert!(sw.elapsed() < Duration::from_millis(30));
    }
}
