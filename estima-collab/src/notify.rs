//! Ordered, synchronous listener sets.
//!
//! Listeners run in registration order on the thread that calls
//! [`Listeners::notify`]. The registry is not locked while callbacks run, so
//! a callback may subscribe or unsubscribe. A listener added during a
//! notification first hears the next one. A listener removed during a
//! notification is skipped if it has not run yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

type Callback<T> = Box<dyn FnMut(&T) + Send>;

struct Entry<T> {
    id: u64,
    active: AtomicBool,
    callback: Mutex<Callback<T>>,
}

impl<T> Entry<T> {
    /// Run the callback unless it was removed or is already running
    /// further up the stack.
    fn call(&self, value: &T) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let mut callback = match self.callback.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        (*callback)(value);
    }
}

struct Registry<T> {
    next_id: u64,
    entries: Vec<Arc<Entry<T>>>,
}

impl<T> Registry<T> {
    fn remove(&mut self, id: u64) {
        self.entries.retain(|entry| {
            if entry.id == id {
                entry.active.store(false, Ordering::SeqCst);
                return false;
            }
            true
        });
    }
}

/// A set of listeners for values of type `T`. Clones share the set.
pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe(&self, listener: impl FnMut(&T) + Send + 'static) -> Subscription {
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Arc::new(Entry {
                id,
                active: AtomicBool::new(true),
                callback: Mutex::new(Box::new(listener)),
            }));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
                }
            })),
        }
    }

    /// Call every listener with `value`, in registration order.
    pub fn notify(&self, value: &T) {
        let entries = self.lock().entries.clone();
        for entry in &entries {
            entry.call(value);
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        for entry in self.lock().entries.drain(..) {
            entry.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unsubscribes, so keep it alive for as long as the
/// listener should run.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Stop receiving notifications. Takes effect immediately.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
