use std::{cell::Cell, time::Instant};

/// Source of the monotonically non-decreasing clock a scheduler runs on.
///
/// `total` is elapsed seconds from an arbitrary zero-point. Two sources
/// may disagree on that zero-point; see
/// [`EventScheduler::change_time_source`](crate::EventScheduler::change_time_source).
pub trait TimeSource {
    fn total(&self) -> f64;
}

impl<F> TimeSource for F
where
    F: Fn() -> f64,
{
    #[inline(always)]
    fn total(&self) -> f64 {
        self()
    }
}

/// Clock advanced explicitly by the host, e.g. once per simulated frame.
///
/// Never moves backwards: `set` with an earlier value is ignored.
#[derive(Debug, Default)]
pub struct ManualClock {
    total: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    pub fn starting_at(total: f64) -> Self {
        Self {
            total: Cell::new(total),
        }
    }

    /// Step forward by `dt` seconds. Negative or NaN steps are ignored.
    pub fn advance(&self, dt: f64) {
        if dt > 0.0 {
            self.total.set(self.total.get() + dt);
        }
    }

    pub fn set(&self, total: f64) {
        if total > self.total.get() {
            self.total.set(total);
        }
    }
}

impl TimeSource for ManualClock {
    #[inline(always)]
    fn total(&self) -> f64 {
        self.total.get()
    }
}

/// Seconds elapsed since an `Instant` epoch.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn with_epoch(epoch: Instant) -> Self {
        Self { epoch }
    }

    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    #[inline(always)]
    fn total(&self) -> f64 {
        Instant::now()
            .saturating_duration_since(self.epoch)
            .as_secs_f64()
    }
}
