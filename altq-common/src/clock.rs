use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use crate::duration_nanos;

/// A monotonic time source in nanoseconds.
///
/// Every time-dependent component (token buckets, JoBS service curves, delay accounting) reads
/// the time through this trait, so tests can drive time explicitly with [`ManualClock`].
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in nanoseconds since an arbitrary, fixed origin.
    fn now(&self) -> u64;
}

/// A [`Clock`] backed by [`Instant`], anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> u64 {
        duration_nanos(self.origin.elapsed())
    }
}

/// A [`Clock`] that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `nanos`.
    pub const fn new(nanos: u64) -> Self {
        Self { nanos: AtomicU64::new(nanos) }
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(duration_nanos(d), Ordering::SeqCst);
    }

    /// Sets the clock to an absolute reading.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
