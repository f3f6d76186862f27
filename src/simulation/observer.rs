use crate::simulation::id::SiteId;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Receives notifications about what vans do. Notifications are informational only, nothing in
/// the simulation depends on what an observer does with them. All methods default to no-ops, so
/// an implementation only overrides what it is interested in.
pub trait BikingObserver: Send + Sync {
    fn on_travel(&self, _from: SiteId, _to: SiteId, _duration_ms: u64) {}
    fn on_occupancy_changed(&self, _site: SiteId, _count: usize) {}
    fn on_log_message(&self, _text: &str) {}
}

/// Used wherever no observer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BikingObserver for NoopObserver {}

/// Forwards every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BikingObserver for TracingObserver {
    fn on_travel(&self, from: SiteId, to: SiteId, duration_ms: u64) {
        trace!(from = from.index(), to = to.index(), duration_ms, "van travel");
    }

    fn on_occupancy_changed(&self, site: SiteId, count: usize) {
        debug!(site = site.index(), count, "occupancy changed");
    }

    fn on_log_message(&self, text: &str) {
        info!("{text}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BikingEvent {
    Travel {
        from: SiteId,
        to: SiteId,
        duration_ms: u64,
    },
    Occupancy {
        site: SiteId,
        count: usize,
    },
    Log(String),
}

/// Counts van trips and log messages without keeping them. Safe to attach for arbitrarily long
/// runs.
#[derive(Debug, Default)]
pub struct CountingObserver {
    travels: AtomicU64,
    messages: AtomicU64,
}

impl CountingObserver {
    pub fn new() -> Self {
        CountingObserver::default()
    }

    pub fn travel_count(&self) -> u64 {
        self.travels.load(Ordering::Relaxed)
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

impl BikingObserver for CountingObserver {
    fn on_travel(&self, _from: SiteId, _to: SiteId, _duration_ms: u64) {
        self.travels.fetch_add(1, Ordering::Relaxed);
    }

    fn on_log_message(&self, _text: &str) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keeps every notification in arrival order. The buffer is never trimmed, meant for tests and
/// short runs.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BikingEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        RecordingObserver::default()
    }

    pub fn events(&self) -> Vec<BikingEvent> {
        self.events.lock().clone()
    }

    pub fn travel_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, BikingEvent::Travel { .. }))
            .count()
    }

    /// The most recently reported occupancy of a site, if any was reported.
    pub fn last_occupancy(&self, site: SiteId) -> Option<usize> {
        self.events.lock().iter().rev().find_map(|e| match e {
            BikingEvent::Occupancy { site: s, count } if *s == site => Some(*count),
            _ => None,
        })
    }
}

impl BikingObserver for RecordingObserver {
    fn on_travel(&self, from: SiteId, to: SiteId, duration_ms: u64) {
        self.events.lock().push(BikingEvent::Travel {
            from,
            to,
            duration_ms,
        });
    }

    fn on_occupancy_changed(&self, site: SiteId, count: usize) {
        self.events
            .lock()
            .push(BikingEvent::Occupancy { site, count });
    }

    fn on_log_message(&self, text: &str) {
        self.events.lock().push(BikingEvent::Log(text.to_string()));
    }
}

/// Fans every notification out to a list of observers, in registration order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn BikingObserver>>,
}

impl Debug for ObserverSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObserverSet {{ observers: {} }}", self.observers.len())
    }
}

impl ObserverSet {
    pub fn new() -> Self {
        ObserverSet::default()
    }

    pub fn add(&mut self, observer: Arc<dyn BikingObserver>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: Arc<dyn BikingObserver>) -> Self {
        self.add(observer);
        self
    }
}

impl BikingObserver for ObserverSet {
    fn on_travel(&self, from: SiteId, to: SiteId, duration_ms: u64) {
        for o in &self.observers {
            o.on_travel(from, to, duration_ms);
        }
    }

    fn on_occupancy_changed(&self, site: SiteId, count: usize) {
        for o in &self.observers {
            o.on_occupancy_changed(site, count);
        }
    }

    fn on_log_message(&self, text: &str) {
        for o in &self.observers {
            o.on_log_message(text);
        }
    }
}
