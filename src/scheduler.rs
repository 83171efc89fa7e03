use std::{
    fmt::Debug,
    iter::FusedIterator,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, trace, warn};

use crate::{
    clock::TimeSource,
    event::ScheduledEvent,
    slab::{NONE, Slab},
};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an event stored in an [`EventScheduler`].
///
/// Handles are `Copy` and carry the id of the scheduler that issued them
/// plus a slot generation. Once the event is disposed or taken the handle
/// goes stale: every lookup through it fails, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    owner: u64,
    index: u32,
    generation: u32,
}

/// Outcome of a successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    /// Linked into the list and will fire.
    Scheduled,
    /// Already linked here; nothing changed.
    AlreadyScheduled,
    /// Accepted but never fires: zero, negative or non-finite interval,
    /// or the repeat limit is already used up.
    Inert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddError {
    #[error("event handle belongs to a different scheduler")]
    ForeignHandle,
    #[error("event handle refers to a disposed event")]
    StaleHandle,
}

struct Node<C> {
    event: ScheduledEvent<C>,
    next_fire: f64,
    prev: u32,
    next: u32,
    linked: bool,
}

/// Fires phase-aligned periodic events against a shared clock.
///
/// Events are kept in an intrusive list sorted by next-fire time, ties in
/// insertion order, backed by a slab so links are plain indices. Each
/// [`update`](Self::update) reads the clock once and fires every due event,
/// repeating an event as many times as the clock has moved past it.
///
/// Single-threaded and synchronous. Callbacks receive `&mut` access to the
/// scheduler and may add, remove or dispose events, including their own.
pub struct EventScheduler<C = ()> {
    id: u64,
    time_source: Rc<dyn TimeSource>,
    nodes: Slab<Node<C>>,
    head: u32,
    len: usize,
    version: u64,
    source_epoch: u64,
    updating: bool,
}

impl<C> EventScheduler<C> {
    pub fn new(time_source: Rc<dyn TimeSource>) -> Self {
        Self::with_capacity(time_source, 0)
    }

    pub fn with_capacity(time_source: Rc<dyn TimeSource>, capacity: usize) -> Self {
        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            time_source,
            nodes: Slab::with_capacity(capacity),
            head: NONE,
            len: 0,
            version: 0,
            source_epoch: 0,
            updating: false,
        }
    }

    /// Number of linked (pending) events.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of events held, linked or not.
    #[inline(always)]
    pub fn stored(&self) -> usize {
        self.nodes.len()
    }

    /// Bumped on every structural change to the list.
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn time_source(&self) -> &Rc<dyn TimeSource> {
        &self.time_source
    }

    /// Fire time of the earliest pending event.
    #[inline]
    pub fn peek_next_fire(&self) -> Option<f64> {
        (self.head != NONE).then(|| self.nodes[self.head].next_fire)
    }

    /// Fire time of a pending event; `None` if it is not linked here.
    pub fn next_fire_time(&self, handle: EventHandle) -> Option<f64> {
        let index = self.resolve(handle).ok()?;
        let node = &self.nodes[index];
        node.linked.then_some(node.next_fire)
    }

    /// True iff the event is linked into this scheduler's list.
    pub fn contains(&self, handle: EventHandle) -> bool {
        self.resolve(handle)
            .is_ok_and(|index| self.nodes[index].linked)
    }

    pub fn get(&self, handle: EventHandle) -> Option<&ScheduledEvent<C>> {
        let index = self.resolve(handle).ok()?;
        Some(&self.nodes[index].event)
    }

    /// Retune a stored event. A linked event keeps its list position and
    /// current fire time; changes apply from its next advance.
    pub fn get_mut(&mut self, handle: EventHandle) -> Option<&mut ScheduledEvent<C>> {
        let index = self.resolve(handle).ok()?;
        Some(&mut self.nodes[index].event)
    }

    /// Store `event` and schedule it against the current clock reading.
    pub fn insert(&mut self, event: ScheduledEvent<C>) -> (EventHandle, AddStatus) {
        let (index, generation) = self.nodes.insert(Node {
            event,
            next_fire: f64::NAN,
            prev: NONE,
            next: NONE,
            linked: false,
        });

        let handle = EventHandle {
            owner: self.id,
            index,
            generation,
        };
        (handle, self.schedule(index))
    }

    /// Link a stored but detached event again, recomputing its fire time.
    ///
    /// A no-op for an event that is already linked.
    pub fn add(&mut self, handle: EventHandle) -> Result<AddStatus, AddError> {
        let index = self.resolve(handle)?;

        if self.nodes[index].linked {
            return Ok(AddStatus::AlreadyScheduled);
        }

        Ok(self.schedule(index))
    }

    /// Unlink an event. It stays stored and can be added again.
    ///
    /// Returns `false` and changes nothing if the event is not linked here.
    pub fn remove(&mut self, handle: EventHandle) -> bool {
        match self.resolve(handle) {
            Ok(index) if self.nodes[index].linked => {
                self.detach(index);
                trace!(index, "removed event");
                true
            }
            _ => false,
        }
    }

    /// Unlink and drop an event, callback included. Idempotent.
    ///
    /// Returns `true` if the handle still referred to a stored event.
    pub fn dispose(&mut self, handle: EventHandle) -> bool {
        self.take(handle).is_some_and(|mut event| {
            event.dispose();
            true
        })
    }

    /// Unlink an event and hand it back, e.g. to insert it elsewhere.
    ///
    /// Taking an event from inside its own callback returns it without
    /// its callback, which is still running.
    pub fn take(&mut self, handle: EventHandle) -> Option<ScheduledEvent<C>> {
        let index = self.resolve(handle).ok()?;

        if self.nodes[index].linked {
            self.detach(index);
        }

        self.nodes
            .remove(index, handle.generation)
            .map(|node| node.event)
    }

    /// Unlink every event without touching callbacks.
    pub fn clear(&mut self) {
        let mut cur = self.head;
        while cur != NONE {
            let node = &mut self.nodes[cur];
            cur = node.next;
            node.prev = NONE;
            node.next = NONE;
            node.linked = false;
        }

        debug!(cleared = self.len, "cleared scheduler");

        self.head = NONE;
        self.len = 0;
        self.bump_version();
    }

    /// Fire every event due at the current clock reading.
    ///
    /// The clock is read once. An event is due while the reading is
    /// strictly past its fire time; after each fire its time advances by
    /// one interval, so a late tick fires it once per missed cycle.
    /// Events fire in fire-time order across the whole tick, so catch-up
    /// fires of different events interleave rather than arriving as one
    /// burst per event.
    ///
    /// Returns the number of callbacks fired. Callback panics propagate.
    pub fn update(&mut self, ctx: &mut C) -> usize {
        if self.head == NONE {
            return 0;
        }

        if self.updating {
            warn!("nested update from a callback ignored");
            return 0;
        }

        self.updating = true;
        let total = self.time_source.total();
        let epoch = self.source_epoch;
        let mut fired = 0usize;

        while self.head != NONE {
            let index = self.head;
            let due_at = self.nodes[index].next_fire;

            if !(total > due_at) {
                break;
            }

            if !self.nodes[index].event.record_fire() {
                self.detach(index);
                debug!(index, "event complete");
                continue;
            }
            fired += 1;

            let handle = self.handle(index);
            self.signal(handle, ctx);

            if self.source_epoch != epoch {
                debug!("time source changed during update, ending tick");
                break;
            }

            // The callback may have moved, removed or replaced this node.
            let still_head = self.head == index
                && self.nodes.get(index, handle.generation).is_some_and(|node| {
                    node.linked && node.next_fire.to_bits() == due_at.to_bits()
                });
            if !still_head {
                continue;
            }

            self.advance(index);
        }

        self.updating = false;
        trace!(fired, total, pending = self.len, "update");
        fired
    }

    /// Swap the clock and recompute every pending fire time from scratch.
    ///
    /// Events that are no longer schedulable are unlinked, not disposed.
    /// No-op when `time_source` is the current source.
    pub fn change_time_source(&mut self, time_source: Rc<dyn TimeSource>) {
        if Rc::ptr_eq(&self.time_source, &time_source) {
            return;
        }

        self.time_source = time_source;
        self.source_epoch += 1;
        self.bump_version();

        let total = self.time_source.total();
        let mut survivors = Vec::with_capacity(self.len);

        let mut cur = self.head;
        while cur != NONE {
            let node = &mut self.nodes[cur];
            let next = node.next;

            node.prev = NONE;
            node.next = NONE;
            node.next_fire = node.event.compute_next_fire_time(total);

            if node.next_fire.is_finite() {
                survivors.push(cur);
            } else {
                node.linked = false;
            }

            cur = next;
        }

        // Stable, so equal times keep their previous relative order.
        survivors.sort_by(|&a, &b| {
            self.nodes[a]
                .next_fire
                .total_cmp(&self.nodes[b].next_fire)
        });

        self.head = NONE;
        let mut prev = NONE;
        for &index in &survivors {
            self.nodes[index].prev = prev;
            if prev == NONE {
                self.head = index;
            } else {
                self.nodes[prev].next = index;
            }
            prev = index;
        }

        debug!(
            total,
            kept = survivors.len(),
            dropped = self.len - survivors.len(),
            "time source changed"
        );
        self.len = survivors.len();
    }

    /// Pending events head to tail, in fire-time order.
    pub fn iter(&self) -> Iter<'_, C> {
        Iter {
            scheduler: self,
            cur: self.head,
            remaining: self.len,
        }
    }

    /// Detached cursor that stops once the list is structurally modified.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            owner: self.id,
            version: self.version,
            next: self.head,
        }
    }

    // ==================== Internals ====================

    #[inline]
    fn resolve(&self, handle: EventHandle) -> Result<u32, AddError> {
        if handle.owner != self.id {
            return Err(AddError::ForeignHandle);
        }
        if !self.nodes.contains(handle.index, handle.generation) {
            return Err(AddError::StaleHandle);
        }
        Ok(handle.index)
    }

    #[inline]
    fn handle(&self, index: u32) -> EventHandle {
        let generation = match self.nodes.generation(index) {
            Some(generation) => generation,
            None => unreachable!("linked node {index} is vacant"),
        };
        EventHandle {
            owner: self.id,
            index,
            generation,
        }
    }

    #[inline(always)]
    fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    fn schedule(&mut self, index: u32) -> AddStatus {
        let total = self.time_source.total();
        let node = &mut self.nodes[index];
        let next_fire = node.event.compute_next_fire_time(total);

        if !next_fire.is_finite() {
            trace!(index, total, "event not schedulable, left inert");
            return AddStatus::Inert;
        }

        node.next_fire = next_fire;
        self.link_sorted(index);
        self.len += 1;
        self.bump_version();

        trace!(index, next_fire, "scheduled event");
        AddStatus::Scheduled
    }

    /// Run the callback of a node that has just recorded a fire.
    fn signal(&mut self, handle: EventHandle, ctx: &mut C) {
        let Some(mut callback) = self.nodes[handle.index].event.callback.take() else {
            return;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| callback(handle, self, ctx)));

        if let Some(node) = self.nodes.get_mut(handle.index, handle.generation) {
            node.event.callback = Some(callback);
        }

        if let Err(payload) = result {
            self.updating = false;
            panic::resume_unwind(payload);
        }
    }

    /// Move a just-fired head node to its next cycle.
    fn advance(&mut self, index: u32) {
        let node = &mut self.nodes[index];

        if node.event.is_complete() {
            self.detach(index);
            debug!(index, "event complete");
            return;
        }

        let interval = node.event.interval();
        let due_at = node.next_fire;
        node.next_fire += interval;
        let next_fire = node.next_fire;

        // Also catches intervals too small to move the fire time at all.
        if !(next_fire > due_at) || !next_fire.is_finite() {
            self.detach(index);
            debug!(index, interval, "dropped event with degenerate interval");
            return;
        }

        let next = node.next;
        if next != NONE && self.nodes[next].next_fire <= next_fire {
            self.unlink(index);
            self.link_sorted(index);
            self.bump_version();
            trace!(index, next_fire, "repositioned event");
        }
    }

    /// Insert before the first node firing strictly later.
    fn link_sorted(&mut self, index: u32) {
        let at = self.nodes[index].next_fire;

        let mut prev = NONE;
        let mut cur = self.head;
        while cur != NONE && self.nodes[cur].next_fire <= at {
            prev = cur;
            cur = self.nodes[cur].next;
        }

        let node = &mut self.nodes[index];
        node.prev = prev;
        node.next = cur;
        node.linked = true;

        if prev == NONE {
            self.head = index;
        } else {
            self.nodes[prev].next = index;
        }
        if cur != NONE {
            self.nodes[cur].prev = index;
        }
    }

    fn unlink(&mut self, index: u32) {
        let node = &mut self.nodes[index];
        let (prev, next) = (node.prev, node.next);
        node.prev = NONE;
        node.next = NONE;
        node.linked = false;

        if prev == NONE {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next != NONE {
            self.nodes[next].prev = prev;
        }
    }

    fn detach(&mut self, index: u32) {
        self.unlink(index);
        self.len -= 1;
        self.bump_version();
    }
}

impl<C> Debug for EventScheduler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("stored", &self.nodes.len())
            .field("version", &self.version)
            .field("next_fire", &self.peek_next_fire())
            .finish()
    }
}

/// Borrowing iterator over pending events in fire-time order.
pub struct Iter<'a, C> {
    scheduler: &'a EventScheduler<C>,
    cur: u32,
    remaining: usize,
}

impl<'a, C> Iterator for Iter<'a, C> {
    type Item = (EventHandle, &'a ScheduledEvent<C>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NONE {
            return None;
        }

        let index = self.cur;
        let node = &self.scheduler.nodes[index];
        self.cur = node.next;
        self.remaining -= 1;

        Some((self.scheduler.handle(index), &node.event))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<C> ExactSizeIterator for Iter<'_, C> {}

impl<C> FusedIterator for Iter<'_, C> {}

impl<'a, C> IntoIterator for &'a EventScheduler<C> {
    type Item = (EventHandle, &'a ScheduledEvent<C>);
    type IntoIter = Iter<'a, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Position in a scheduler's list that outlives borrows of the scheduler.
///
/// Captures the scheduler's version on creation. Any structural change
/// after that (add, remove, clear, repositioning during update) makes
/// [`next`](Self::next) return `None` for good; [`reset`](Self::reset)
/// starts over from the current head.
#[derive(Debug, Clone)]
pub struct Cursor {
    owner: u64,
    version: u64,
    next: u32,
}

impl Cursor {
    pub fn next<C>(&mut self, scheduler: &EventScheduler<C>) -> Option<EventHandle> {
        if scheduler.id != self.owner || scheduler.version != self.version {
            self.next = NONE;
            return None;
        }

        if self.next == NONE {
            return None;
        }

        let index = self.next;
        self.next = scheduler.nodes[index].next;
        Some(scheduler.handle(index))
    }

    pub fn reset<C>(&mut self, scheduler: &EventScheduler<C>) {
        *self = scheduler.cursor();
    }
}
