//! Monotonic time sources and per-call timers
//!
//! The engine never reads `Instant::now()` directly; it asks a [`Clock`].
//! Live profiling uses [`MonotonicClock`], trace replay and tests drive a
//! [`ManualClock`] so that intervals are exact.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic instants
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the profiler.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset_ns: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the clock forward by `delta`
    pub fn advance(&self, delta: Duration) {
        self.offset_ns
            .fetch_add(duration_to_nanos(delta), Ordering::Relaxed);
    }

    /// Move the clock to `offset` past its origin; earlier offsets are ignored
    pub fn advance_to(&self, offset: Duration) {
        self.offset_ns
            .fetch_max(duration_to_nanos(offset), Ordering::Relaxed);
    }

    /// Time elapsed since the clock was created, as seen by the clock
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Relaxed))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Running timer for one active call
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    /// Start a timer at the clock's current reading
    pub fn start(clock: &dyn Clock) -> Self {
        Self {
            started: clock.now(),
        }
    }

    /// Elapsed time up to the clock's current reading
    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_duration_since(self.started)
    }
}
