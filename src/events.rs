//! Change notification for store mutations.
//!
//! Observers register with a [`ChangeNotifier`] and receive one
//! [`ChangeEvent`] per add, update, or remove. Dispatch happens on the
//! mutating thread after the change is committed to the cache; observers that
//! need a different execution context must hand the event off themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::profile::{FlatSettings, ProfileRecord};

/// Minimal capability the notifier needs from a record.
pub trait SettingsHolder: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
    fn settings(&self) -> &FlatSettings;
}

impl SettingsHolder for ProfileRecord {
    fn id(&self) -> Uuid {
        Self::id(self)
    }

    fn name(&self) -> &str {
        Self::name(self)
    }

    fn settings(&self) -> &FlatSettings {
        Self::settings(self)
    }
}

/// Kind of mutation an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        })
    }
}

/// A single committed mutation.
///
/// `sequence` orders events for the same record: a store assigns it while
/// holding its lock, so a higher sequence is always the later commit even
/// when observers see events out of order. Events built outside a store
/// carry 0.
#[derive(Debug, Clone)]
pub struct ChangeEvent<R: SettingsHolder = ProfileRecord> {
    pub kind: ChangeKind,
    pub record: R,
    pub sequence: u64,
}

impl<R: SettingsHolder> ChangeEvent<R> {
    pub const fn added(record: R) -> Self {
        Self {
            kind: ChangeKind::Added,
            record,
            sequence: 0,
        }
    }

    pub const fn updated(record: R) -> Self {
        Self {
            kind: ChangeKind::Updated,
            record,
            sequence: 0,
        }
    }

    pub const fn removed(record: R) -> Self {
        Self {
            kind: ChangeKind::Removed,
            record,
            sequence: 0,
        }
    }

    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Receives change events.
pub trait ChangeObserver<R: SettingsHolder = ProfileRecord>: Send + Sync {
    fn on_change(&self, event: &ChangeEvent<R>);
}

impl<R, F> ChangeObserver<R> for F
where
    R: SettingsHolder,
    F: Fn(&ChangeEvent<R>) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent<R>) {
        self(event);
    }
}

/// Handle returned by [`ChangeNotifier::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// Registry of observers with copy-on-dispatch semantics.
pub struct ChangeNotifier<R: SettingsHolder = ProfileRecord> {
    observers: RwLock<BTreeMap<ObserverId, Arc<dyn ChangeObserver<R>>>>,
    next_id: AtomicU64,
}

impl<R: SettingsHolder> Default for ChangeNotifier<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SettingsHolder> ChangeNotifier<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn register(&self, observer: Arc<dyn ChangeObserver<R>>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, observer);
        debug!(observer = id.0, "Observer registered");
        id
    }

    /// Register a closure as an observer.
    pub fn subscribe<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&ChangeEvent<R>) + Send + Sync + 'static,
    {
        self.register(Arc::new(f))
    }

    /// Remove an observer. Returns false if it was not registered.
    ///
    /// Safe to call from inside a notification callback.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        debug!(observer = id.0, removed, "Observer unregistered");
        removed
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every observer registered at dispatch time.
    pub fn notify(&self, event: &ChangeEvent<R>) {
        // Snapshot under the lock, dispatch without it.
        let observers: Vec<Arc<dyn ChangeObserver<R>>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        trace!(
            kind = %event.kind,
            id = %event.record.id(),
            observers = observers.len(),
            "Dispatching change event"
        );
        for observer in observers {
            observer.on_change(event);
        }
    }
}

impl<R: SettingsHolder> fmt::Debug for ChangeNotifier<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.observer_count())
            .finish()
    }
}
