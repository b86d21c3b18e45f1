//! Time abstraction for testability.
//!
//! Due-ness and backoff deadlines are pure functions of "now", so the
//! manager reads time through a trait. Production code uses
//! [`SystemClock`]; tests drive [`MockClock`] forward without sleeping.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> u64;
}

/// Real system clock implementation. Use this in production code.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis(),
        )
        .unwrap_or(u64::MAX)
    }
}

/// Mock clock for deterministic testing.
///
/// Starts at the current real time and only moves when advanced manually.
/// Clones share the same underlying elapsed time.
#[derive(Debug, Clone)]
pub struct MockClock {
    base_millis: u64,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock anchored at the current real time.
    pub fn new() -> Self {
        Self { base_millis: SystemClock.now_millis(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Create a mock clock anchored at a fixed epoch-millisecond value.
    pub fn at(base_millis: u64) -> Self {
        Self { base_millis, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock by `duration` without waiting.
    pub fn advance(&self, duration: Duration) {
        // Test utility: panic on poisoned mutex to fail tests early
        let mut elapsed = self.elapsed.lock().expect("mutex poisoned");
        *elapsed += duration;
    }

    /// Simulated time since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        // Test utility: panic on poisoned mutex to fail tests early
        *self.elapsed.lock().expect("mutex poisoned")
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_millis.saturating_add(elapsed)
    }
}
