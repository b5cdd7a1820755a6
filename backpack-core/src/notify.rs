//! Change notification bus
//!
//! One [`Channel`] per entity kind. The store publishes to a channel after
//! its write transaction has committed and the write lock is released, so
//! listeners may freely read from (or write to) the store.
//!
//! Dispatch is synchronous, on the writer's thread, in registration order.
//! A listener that returns an error or panics is logged and counted; the
//! remaining listeners still run and the committed write is unaffected.

use crate::types::{ActivityKind, LocationFix};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Error type listeners report failures with.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a listener callback.
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Something that wants to hear about changes of one entity kind.
///
/// Implemented for any `Fn(&E) -> ListenerResult`, so closures can be
/// subscribed directly.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> ListenerResult;
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) -> ListenerResult + Send + Sync,
{
    fn on_event(&self, event: &E) -> ListenerResult {
        self(event)
    }
}

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<E> {
    id: ListenerId,
    /// Address of the listener allocation, used to make subscribe idempotent
    key: usize,
    listener: Arc<dyn Listener<E>>,
}

/// Registry and dispatcher for one entity kind.
pub struct Channel<E> {
    name: &'static str,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Registration<E>>>,
    failures: AtomicU64,
}

impl<E> Channel<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            failures: AtomicU64::new(0),
        }
    }

    /// Channel name used in log output
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener.
    ///
    /// Subscribing the same `Arc` twice returns the first id and does not
    /// register it again.
    pub fn subscribe<L>(&self, listener: Arc<L>) -> ListenerId
    where
        L: Listener<E> + 'static,
    {
        let key = Arc::as_ptr(&listener) as *const () as usize;
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = listeners.iter().find(|r| r.key == key) {
            return existing.id;
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        listeners.push(Registration {
            id,
            key,
            listener,
        });
        tracing::debug!(channel = self.name, listener = id.0, "Listener subscribed");
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        before != listeners.len()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total listener failures (errors and panics) seen on this channel
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every listener. Returns how many failed.
    pub(crate) fn publish(&self, event: &E) -> usize
    where
        E: std::fmt::Debug,
    {
        // Snapshot so listeners can (un)subscribe from inside a callback
        let snapshot: Vec<(ListenerId, Arc<dyn Listener<E>>)> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        let mut failed = 0;
        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            failed += 1;
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                channel = self.name,
                listener = id.0,
                ?event,
                error = %error,
                "Listener failed"
            );
        }
        failed
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ============================================
// Events
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Added { id: i64, fix: LocationFix },
    Updated { id: i64 },
    Deleted { id: i64 },
    RangeDeleted { from: i64, to: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityTypeEvent {
    Added {
        time: i64,
        activity: ActivityKind,
        confidence: i32,
    },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityDurationEvent {
    /// A bucket was created for `day`
    Added { day: i64 },
    /// `activity`'s counter for `day` now reads `total`
    Updated {
        day: i64,
        activity: ActivityKind,
        total: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityLogEvent {
    Added {
        start: i64,
        finish: i64,
        activity: ActivityKind,
    },
    Updated {
        start: i64,
        finish: i64,
        activity: ActivityKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Added { day: i64, count: i64 },
    Updated { day: i64, count: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeatherEvent {
    Added { time: i64, station_id: i64 },
}

// ============================================
// Bus
// ============================================

/// The six notification channels of a store.
///
/// Owned by (or shared between) [`crate::Database`] instances; there is no
/// process-wide registry.
pub struct ChangeBus {
    locations: Channel<LocationEvent>,
    activity_types: Channel<ActivityTypeEvent>,
    activity_durations: Channel<ActivityDurationEvent>,
    activity_log: Channel<ActivityLogEvent>,
    steps: Channel<StepEvent>,
    weather: Channel<WeatherEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            locations: Channel::new("location"),
            activity_types: Channel::new("activity_type"),
            activity_durations: Channel::new("activity_duration"),
            activity_log: Channel::new("activity_log"),
            steps: Channel::new("step"),
            weather: Channel::new("weather"),
        }
    }

    pub fn locations(&self) -> &Channel<LocationEvent> {
        &self.locations
    }

    pub fn activity_types(&self) -> &Channel<ActivityTypeEvent> {
        &self.activity_types
    }

    pub fn activity_durations(&self) -> &Channel<ActivityDurationEvent> {
        &self.activity_durations
    }

    pub fn activity_log(&self) -> &Channel<ActivityLogEvent> {
        &self.activity_log
    }

    pub fn steps(&self) -> &Channel<StepEvent> {
        &self.steps
    }

    pub fn weather(&self) -> &Channel<WeatherEvent> {
        &self.weather
    }

    /// Listener failures across all channels
    pub fn failures(&self) -> u64 {
        self.locations.failures()
            + self.activity_types.failures()
            + self.activity_durations.failures()
            + self.activity_log.failures()
            + self.steps.failures()
            + self.weather.failures()
    }
}
