//! Explicitly managed observers of pipeline events.

use crate::error::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;
use vaultline_core::TaskKey;

/// Something that happened to a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    Enqueued { key: TaskKey },
    Started { key: TaskKey },
    BlockTransferred { key: TaskKey, index: i64 },
    Completed { key: TaskKey },
    RetryScheduled { key: TaskKey, retry_count: u32, run_at: OffsetDateTime },
    Failed { key: TaskKey, kind: ErrorKind, message: String },
    Cancelled { key: TaskKey },
}

impl TransferEvent {
    /// The task the event is about.
    pub fn key(&self) -> &TaskKey {
        match self {
            Self::Enqueued { key }
            | Self::Started { key }
            | Self::BlockTransferred { key, .. }
            | Self::Completed { key }
            | Self::RetryScheduled { key, .. }
            | Self::Failed { key, .. }
            | Self::Cancelled { key } => key,
        }
    }
}

/// Receives events.
pub trait Observer<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Observer<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observers registered and removed explicitly, with a final teardown.
pub struct ObserverRegistry<E> {
    next_id: AtomicU64,
    closed: AtomicBool,
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer<E>>)>>,
}

impl<E> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> ObserverRegistry<E> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Returns `None` once the registry has been torn down.
    pub fn register(&self, observer: Arc<dyn Observer<E>>) -> Option<ObserverId> {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        observers.push((id, observer));
        Some(id)
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver `event` to every observer, in registration order.
    pub fn notify(&self, event: &E) {
        // Snapshot so observers may (un)register from inside the callback.
        let snapshot: Vec<Arc<dyn Observer<E>>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in snapshot {
            observer.on_event(event);
        }
    }

    /// Drop every observer and refuse new registrations.
    pub fn teardown(&self) {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
        observers.clear();
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
