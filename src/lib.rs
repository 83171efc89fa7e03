//! Phase-aligned recurring event scheduler.
//!
//! [`EventScheduler`] keeps periodic and one-shot [`ScheduledEvent`]s in a
//! list sorted by next-fire time and fires whatever is due each time the
//! host calls [`EventScheduler::update`]. Time comes from a [`TimeSource`]:
//! an opaque, monotonically non-decreasing count of seconds.
//!
//! ```
//! use std::rc::Rc;
//! use phase_scheduler::{EventScheduler, ManualClock, ScheduledEvent};
//!
//! let clock = Rc::new(ManualClock::new());
//! let mut scheduler: EventScheduler<u32> = EventScheduler::new(clock.clone());
//!
//! scheduler.insert(ScheduledEvent::new(1.0, |_, _, fired: &mut u32| *fired += 1));
//!
//! let mut fired = 0;
//! clock.set(3.5);
//! scheduler.update(&mut fired);
//! assert_eq!(fired, 3);
//! ```

mod clock;
mod event;
mod scheduler;
mod slab;

#[cfg(test)]
mod proptests;

pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use event::{Callback, ScheduledEvent};
pub use scheduler::{AddError, AddStatus, Cursor, EventHandle, EventScheduler, Iter};
