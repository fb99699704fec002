//! Ordered lifecycle observer lists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub(crate) type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;
type Entries<A> = Mutex<Vec<(u64, Callback<A>)>>;

/// Observers invoked in registration order.
pub struct ObserverList<A: 'static> {
    entries: Arc<Entries<A>>,
    next_id: AtomicU64,
}

impl<A: 'static> ObserverList<A> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Append an observer; the returned handle removes it again.
    pub fn register(&self, callback: Callback<A>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, callback));

        let entries = Arc::downgrade(&self.entries);
        ObserverHandle {
            remove: Box::new(move || {
                if let Some(entries) = Weak::upgrade(&entries) {
                    lock(&entries).retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Invoke every observer with `arg`, oldest registration first.
    pub fn notify(&self, arg: &A) {
        for callback in self.snapshot() {
            callback(arg);
        }
    }

    /// Current observers in registration order. Invoking a snapshot rather
    /// than the live list lets observers register or remove others.
    pub(crate) fn snapshot(&self) -> Vec<Callback<A>> {
        lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: 'static> Default for ObserverList<A> {
    fn default() -> Self {
        Self::new()
    }
}

// Observer callbacks never run under the lock, so a poisoned list is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returned from observer registration; call [`ObserverHandle::remove`] to stop
/// receiving notifications. Dropping the handle leaves the observer registered.
pub struct ObserverHandle {
    remove: Box<dyn FnOnce() + Send + Sync>,
}

impl ObserverHandle {
    pub fn remove(self) {
        (self.remove)()
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle").finish_non_exhaustive()
    }
}
