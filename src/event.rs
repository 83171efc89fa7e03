use std::fmt::Debug;

use crate::scheduler::{EventHandle, EventScheduler};

/// Callback run each time an event becomes due.
///
/// Receives the event's own handle, the scheduler it is firing from and
/// the caller context passed to [`EventScheduler::update`]. The scheduler
/// may be mutated freely, including removing or disposing this event.
pub type Callback<C> = Box<dyn FnMut(EventHandle, &mut EventScheduler<C>, &mut C)>;

/// A periodic or one-shot callback with a phase offset.
///
/// Events sharing an `interval` and `offset` fire on the same absolute
/// instants no matter when each was added.
pub struct ScheduledEvent<C = ()> {
    interval: f64,
    offset: f64,
    repeat_limit: u32,
    fired_count: u32,
    pub(crate) callback: Option<Callback<C>>,
}

impl<C> ScheduledEvent<C> {
    /// Repeats forever every `interval` seconds.
    pub fn new<F>(interval: f64, callback: F) -> Self
    where
        F: FnMut(EventHandle, &mut EventScheduler<C>, &mut C) + 'static,
    {
        Self {
            interval,
            offset: 0.0,
            repeat_limit: 0,
            fired_count: 0,
            callback: Some(Box::new(callback)),
        }
    }

    /// Fires once, at the next multiple of `interval` (shifted by any offset).
    pub fn once<F>(interval: f64, callback: F) -> Self
    where
        F: FnMut(EventHandle, &mut EventScheduler<C>, &mut C) + 'static,
    {
        Self::new(interval, callback).with_repeat_limit(1)
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// `0` repeats forever.
    pub fn with_repeat_limit(mut self, repeat_limit: u32) -> Self {
        self.repeat_limit = repeat_limit;
        self
    }

    #[inline(always)]
    pub fn interval(&self) -> f64 {
        self.interval
    }

    #[inline(always)]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    #[inline(always)]
    pub fn repeat_limit(&self) -> u32 {
        self.repeat_limit
    }

    #[inline(always)]
    pub fn fired_count(&self) -> u32 {
        self.fired_count
    }

    /// Takes effect from the next advance; a linked event is not moved.
    pub fn set_interval(&mut self, interval: f64) {
        self.interval = interval;
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    pub fn set_repeat_limit(&mut self, repeat_limit: u32) {
        self.repeat_limit = repeat_limit;
    }

    /// Re-arm a finished event so it can be added again.
    pub fn reset_fired_count(&mut self) {
        self.fired_count = 0;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.repeat_limit > 0 && self.fired_count >= self.repeat_limit
    }

    /// Absolute time this event is next due given the clock reading `total`.
    ///
    /// Aligns to the cycle grid: the result is the first instant after
    /// `total` of the form `k * interval + offset`. `NaN` when the event
    /// is complete or its interval is zero, negative, infinite or NaN.
    pub fn compute_next_fire_time(&self, total: f64) -> f64 {
        if self.is_complete() || !(self.interval > 0.0 && self.interval.is_finite()) {
            return f64::NAN;
        }

        let phase = total % self.interval;
        let base = total - phase + self.offset;

        if phase >= self.offset {
            base + self.interval
        } else {
            base
        }
    }

    /// Count one fire. Returns `false` without counting when already complete.
    #[inline]
    pub(crate) fn record_fire(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.fired_count += 1;
        true
    }

    /// Reset to an inert event: zero interval and offset, no repeat limit,
    /// no callback. Idempotent.
    ///
    /// Reached only through [`EventScheduler::dispose`], which unlinks the
    /// event first.
    pub(crate) fn dispose(&mut self) {
        self.interval = 0.0;
        self.offset = 0.0;
        self.repeat_limit = 0;
        self.callback = None;
    }
}

impl<C> Debug for ScheduledEvent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("interval", &self.interval)
            .field("offset", &self.offset)
            .field("repeat_limit", &self.repeat_limit)
            .field("fired_count", &self.fired_count)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
