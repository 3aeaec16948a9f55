//! Publish/subscribe registry used for sync updates and health transitions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

/// Receives every event published on a registry
pub trait Observer<E>: Send + Sync {
    fn notify(&self, event: &E);
}

impl<E, F> Observer<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn notify(&self, event: &E) {
        self(event)
    }
}

type Entry<E> = (u64, Arc<dyn Observer<E>>);

struct RegistryInner<E> {
    next_id: AtomicU64,
    observers: RwLock<Vec<Entry<E>>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<E: 'static> Detach for RegistryInner<E> {
    fn detach(&self, id: u64) {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        observers.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Set of observers for one event type
pub struct ObserverRegistry<E> {
    inner: Arc<RegistryInner<E>>,
}

impl<E: 'static> ObserverRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register an observer. It stays attached until the returned
    /// subscription is dropped or unsubscribed.
    pub fn subscribe(&self, observer: Arc<dyn Observer<E>>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&inner),
        }
    }

    /// Register a closure
    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Deliver an event to every attached observer
    pub fn notify(&self, event: &E) {
        // Snapshot so observers may unsubscribe while being notified
        let observers: Vec<Arc<dyn Observer<E>>> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            observer.notify(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach every observer
    pub fn clear(&self) {
        let mut observers = self.inner.observers.write().unwrap_or_else(|e| e.into_inner());
        debug!("Detaching {} observers", observers.len());
        observers.clear();
    }
}

impl<E: 'static> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`ObserverRegistry::subscribe`]
#[must_use = "dropping a subscription detaches the observer"]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    /// Detach the observer now
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
