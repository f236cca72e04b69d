//! # Clock Module
//!
//! Monotonic time source used for cadence gating.
//!
//! The control loop never reads `Instant::now()` directly so that the
//! movement cadence can be driven deterministically in tests.

use std::time::{Duration, Instant};

/// Monotonic clock abstraction.
pub trait Clock: Send {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Time elapsed since `earlier`, saturating at zero.
    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Real-time clock backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
