//! Typed degradation events and their delivery.
//!
//! Events are emitted while vehicles are evaluated (expiry, continuous and
//! periodic phases) and delivered in batch at the end of the tick through
//! the [`EventBus`].
//!
//! Passive listeners are the host's notification surface: they receive
//! events read-only and may not mutate engine state.
//!
//! # Notices
//!
//! Raw events fire for every state change. User-visible [`Event::Notice`]s
//! are additionally gated by a [`NoticeLimiter`]: once per activation, and
//! never more often than `min_interval_ms` per vehicle and notice kind.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`]; they are then
//! never queued or counted.

use crate::fluid::FluidKind;
use crate::id::{Component, VehicleId};
use crate::malfunction::MalfunctionKind;
use crate::sim::Millis;
use std::collections::{HashMap, VecDeque};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Source of a newly started leak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeakSource {
    Oil,
    Hydraulic,
    Fuel,
}

/// What a user-visible notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    Malfunction(MalfunctionKind),
    FluidLow(FluidKind),
    FluidCritical(FluidKind),
    Breakdown(Component),
    DriftSettled,
}

/// A simulation event. All events carry the vehicle and the clock time at
/// which they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MalfunctionStarted {
        vehicle: VehicleId,
        kind: MalfunctionKind,
        at: Millis,
    },
    MalfunctionEnded {
        vehicle: VehicleId,
        kind: MalfunctionKind,
        at: Millis,
    },
    Breakdown {
        vehicle: VehicleId,
        component: Component,
        ceiling: f32,
        at: Millis,
    },
    Seized {
        vehicle: VehicleId,
        component: Component,
        at: Millis,
    },
    FluidLow {
        vehicle: VehicleId,
        fluid: FluidKind,
        level: f32,
        at: Millis,
    },
    FluidCritical {
        vehicle: VehicleId,
        fluid: FluidKind,
        level: f32,
        at: Millis,
    },
    LeakStarted {
        vehicle: VehicleId,
        source: LeakSource,
        at: Millis,
    },
    DriftSettled {
        vehicle: VehicleId,
        at: Millis,
    },
    Notice {
        vehicle: VehicleId,
        notice: NoticeKind,
        at: Millis,
    },
}

/// Discriminant tag for event types, used for suppression and listener routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MalfunctionStarted,
    MalfunctionEnded,
    Breakdown,
    Seized,
    FluidLow,
    FluidCritical,
    LeakStarted,
    DriftSettled,
    Notice,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 9;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MalfunctionStarted { .. } => EventKind::MalfunctionStarted,
            Event::MalfunctionEnded { .. } => EventKind::MalfunctionEnded,
            Event::Breakdown { .. } => EventKind::Breakdown,
            Event::Seized { .. } => EventKind::Seized,
            Event::FluidLow { .. } => EventKind::FluidLow,
            Event::FluidCritical { .. } => EventKind::FluidCritical,
            Event::LeakStarted { .. } => EventKind::LeakStarted,
            Event::DriftSettled { .. } => EventKind::DriftSettled,
            Event::Notice { .. } => EventKind::Notice,
        }
    }

    /// The vehicle this event concerns.
    pub fn vehicle(&self) -> VehicleId {
        match *self {
            Event::MalfunctionStarted { vehicle, .. }
            | Event::MalfunctionEnded { vehicle, .. }
            | Event::Breakdown { vehicle, .. }
            | Event::Seized { vehicle, .. }
            | Event::FluidLow { vehicle, .. }
            | Event::FluidCritical { vehicle, .. }
            | Event::LeakStarted { vehicle, .. }
            | Event::DriftSettled { vehicle, .. }
            | Event::Notice { vehicle, .. } => vehicle,
        }
    }

    pub fn at(&self) -> Millis {
        match *self {
            Event::MalfunctionStarted { at, .. }
            | Event::MalfunctionEnded { at, .. }
            | Event::Breakdown { at, .. }
            | Event::Seized { at, .. }
            | Event::FluidLow { at, .. }
            | Event::FluidCritical { at, .. }
            | Event::LeakStarted { at, .. }
            | Event::DriftSettled { at, .. }
            | Event::Notice { at, .. } => at,
        }
    }

    /// The user-visible notice this event may raise, if any.
    pub fn notice(&self) -> Option<NoticeKind> {
        match *self {
            Event::MalfunctionStarted { kind, .. } => Some(NoticeKind::Malfunction(kind)),
            Event::Seized { component, .. } => {
                Some(NoticeKind::Malfunction(MalfunctionKind::Seized(component)))
            }
            Event::Breakdown { component, .. } => Some(NoticeKind::Breakdown(component)),
            Event::FluidLow { fluid, .. } => Some(NoticeKind::FluidLow(fluid)),
            Event::FluidCritical { fluid, .. } => Some(NoticeKind::FluidCritical(fluid)),
            Event::DriftSettled { .. } => Some(NoticeKind::DriftSettled),
            _ => None,
        }
    }
}

impl EventKind {
    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Per-tick event queue with per-kind listeners and suppression flags.
///
/// Events queue in emission order across all kinds, so a [`Event::Notice`]
/// is always delivered after the raw event that raised it. The queue is
/// bounded; on overflow the oldest pending event is dropped and counted.
pub struct EventBus {
    pending: VecDeque<Event>,
    capacity: usize,
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<PassiveListener>; EVENT_KIND_COUNT],
    emitted: [u64; EVENT_KIND_COUNT],
    dropped: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pending", &self.pending.len())
            .field("capacity", &self.capacity)
            .field("suppressed", &self.suppressed)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
            emitted: [0; EVENT_KIND_COUNT],
            dropped: 0,
        }
    }

    /// Suppressed kinds are dropped at emission and never reach a listener.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.pending.retain(|e| e.kind() != kind);
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        if self.pending.len() == self.capacity
            && let Some(oldest) = self.pending.pop_front()
        {
            log::warn!("event queue full, dropping {:?}", oldest.kind());
            self.dropped += 1;
        }
        self.emitted[idx] += 1;
        self.pending.push_back(event);
    }

    /// Listeners of one kind run in registration order.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.listeners[kind.index()].push(listener);
    }

    /// Drain the queue into the listeners, oldest event first.
    pub fn deliver(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            for listener in &mut self.listeners[event.kind().index()] {
                listener(&event);
            }
        }
    }

    pub fn pending_count(&self, kind: EventKind) -> usize {
        self.pending.iter().filter(|e| e.kind() == kind).count()
    }

    /// Events of `kind` accepted since creation, including dropped ones.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.emitted[kind.index()]
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

// ---------------------------------------------------------------------------
// Notice limiter
// ---------------------------------------------------------------------------

/// Enforces the minimum spacing of user-visible notices per vehicle and
/// notice kind.
#[derive(Debug, Default, Clone)]
pub struct NoticeLimiter {
    last_shown: HashMap<(VehicleId, NoticeKind), Millis>,
}

impl NoticeLimiter {
    /// Returns `true` and records the notice if it may be shown now.
    pub fn admit(&mut self, vehicle: VehicleId, notice: NoticeKind, now: Millis, min_interval: Millis) -> bool {
        match self.last_shown.get(&(vehicle, notice)) {
            Some(&last) if now.saturating_sub(last) < min_interval => {
                log::trace!("notice {notice:?} for {vehicle:?} rate-limited");
                false
            }
            _ => {
                self.last_shown.insert((vehicle, notice), now);
                true
            }
        }
    }

    /// Drop bookkeeping for a removed vehicle.
    pub fn forget(&mut self, vehicle: VehicleId) {
        self.last_shown.retain(|(v, _), _| *v != vehicle);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn vehicle() -> VehicleId {
        let mut sm = SlotMap::<VehicleId, ()>::with_key();
        sm.insert(())
    }

    fn started(vehicle: VehicleId, at: Millis) -> Event {
        Event::MalfunctionStarted {
            vehicle,
            kind: MalfunctionKind::Misfire,
            at,
        }
    }

    fn collect(bus: &mut EventBus, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.on_passive(kind, Box::new(move |e| sink.borrow_mut().push(e.clone())));
        seen
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut bus = EventBus::new(3);
        let v = vehicle();
        let seen = collect(&mut bus, EventKind::MalfunctionStarted);
        for i in 0..5 {
            bus.emit(started(v, i));
        }
        assert_eq!(bus.pending_count(EventKind::MalfunctionStarted), 3);
        assert_eq!(bus.total_emitted(EventKind::MalfunctionStarted), 5);
        assert_eq!(bus.dropped_count(), 2);

        bus.deliver();
        let times: Vec<Millis> = seen.borrow().iter().map(|e| e.at()).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut bus = EventBus::new(0);
        bus.emit(started(vehicle(), 0));
        assert_eq!(bus.pending_count(EventKind::MalfunctionStarted), 1);
    }

    #[test]
    fn bus_delivers_to_passive_listeners_and_clears() {
        let mut bus = EventBus::new(16);
        let v = vehicle();
        let seen = collect(&mut bus, EventKind::MalfunctionStarted);

        bus.emit(started(v, 10));
        bus.emit(Event::DriftSettled { vehicle: v, at: 11 });
        assert_eq!(bus.pending_count(EventKind::MalfunctionStarted), 1);
        assert_eq!(bus.pending_count(EventKind::DriftSettled), 1);

        bus.deliver();
        assert_eq!(seen.borrow().as_slice(), &[started(v, 10)]);
        assert_eq!(bus.pending_count(EventKind::MalfunctionStarted), 0);
        assert_eq!(bus.pending_count(EventKind::DriftSettled), 0);
        assert_eq!(bus.total_emitted(EventKind::MalfunctionStarted), 1);
    }

    #[test]
    fn suppressed_kinds_are_never_queued() {
        let mut bus = EventBus::default();
        let v = vehicle();
        bus.emit(Event::DriftSettled { vehicle: v, at: 0 });
        bus.suppress(EventKind::DriftSettled);
        bus.emit(Event::DriftSettled { vehicle: v, at: 1 });
        assert!(bus.is_suppressed(EventKind::DriftSettled));
        assert_eq!(bus.pending_count(EventKind::DriftSettled), 0);
        assert_eq!(bus.total_emitted(EventKind::DriftSettled), 1);
    }

    #[test]
    fn notices_follow_their_raw_event() {
        let mut bus = EventBus::new(8);
        let v = vehicle();
        let order = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Notice, EventKind::MalfunctionStarted] {
            let order = order.clone();
            bus.on_passive(kind, Box::new(move |e| order.borrow_mut().push(e.kind())));
        }
        let raw = started(v, 0);
        let notice = raw.notice();
        bus.emit(raw);
        if let Some(notice) = notice {
            bus.emit(Event::Notice {
                vehicle: v,
                notice,
                at: 0,
            });
        }
        bus.deliver();
        assert_eq!(
            order.borrow().as_slice(),
            &[EventKind::MalfunctionStarted, EventKind::Notice]
        );
    }

    #[test]
    fn notice_limiter_spaces_repeats() {
        let mut limiter = NoticeLimiter::default();
        let v = vehicle();
        let kind = NoticeKind::Malfunction(MalfunctionKind::Misfire);
        assert!(limiter.admit(v, kind, 0, 10_000));
        assert!(!limiter.admit(v, kind, 9_999, 10_000));
        assert!(limiter.admit(v, NoticeKind::DriftSettled, 9_999, 10_000));
        assert!(limiter.admit(v, kind, 10_000, 10_000));

        limiter.forget(v);
        assert!(limiter.admit(v, kind, 10_001, 10_000));
    }

    #[test]
    fn raw_events_map_to_notices() {
        let v = vehicle();
        assert_eq!(
            started(v, 0).notice(),
            Some(NoticeKind::Malfunction(MalfunctionKind::Misfire))
        );
        let ended = Event::MalfunctionEnded {
            vehicle: v,
            kind: MalfunctionKind::Misfire,
            at: 0,
        };
        assert_eq!(ended.notice(), None);
        let seized = Event::Seized {
            vehicle: v,
            component: Component::Engine,
            at: 0,
        };
        assert_eq!(
            seized.notice(),
            Some(NoticeKind::Malfunction(MalfunctionKind::Seized(Component::Engine)))
        );
    }
}
