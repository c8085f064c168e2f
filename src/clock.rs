//! Time source for the engine.
//!
//! `wait` deadlines and the sensing timer are measured on a [`Clock`], so
//! tests can drive time with a [`MockClock`] while real runs use the system
//! clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time since the clock was created. Never decreases.
    fn now(&self) -> Duration;

    /// Blocks the calling thread for `duration`. Mock clocks advance instead.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually driven clock. Clones share the same time, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    nanos: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Moves the clock to `time`; earlier times are ignored.
    pub fn set(&self, time: Duration) {
        self.nanos
            .fetch_max(time.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_handles_share_time() {
        let clock = MockClock::new();
        let handle = clock.clone();
        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(250));
        clock.set(Duration::from_millis(100));
        assert_eq!(handle.now(), Duration::from_millis(250), "set never rewinds");
    }
}
