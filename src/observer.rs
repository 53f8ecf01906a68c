//! Change listeners for the store and the relay coordinator.
//!
//! The presentation layer registers a callback and is handed the newest
//! snapshot after state changes. Callbacks run outside the owner's lock, so
//! a listener may read back into the component that notified it.
//!
//! Every state carries a version. Only one thread delivers at a time and a
//! listener never sees a version older than one it already got; changes
//! that land while another thread is delivering are coalesced into the
//! newest snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

/// Handle returned by `subscribe`, used to remove the listener again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
    /// held while callbacks run
    delivering: Mutex<()>,
    /// version of the last snapshot handed out
    delivered: AtomicU64,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
            delivering: Mutex::new(()),
            delivered: AtomicU64::new(0),
        }
    }
}

impl<T> Listeners<T> {
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Hand the newest state to every listener.
    ///
    /// `latest` returns the owner's current `(version, snapshot)` and must
    /// not be called with the owner's lock held. when another thread (or a
    /// listener further up this stack) is already delivering, this returns
    /// at once and that delivery picks the change up before it finishes.
    pub fn publish(&self, latest: impl Fn() -> (u64, T)) {
        loop {
            let Some(guard) = self.try_deliver() else {
                return;
            };
            loop {
                let (version, snapshot) = latest();
                if version <= self.delivered.load(Ordering::SeqCst) {
                    break;
                }
                self.delivered.store(version, Ordering::SeqCst);
                for cb in self.callbacks() {
                    cb(&snapshot);
                }
            }
            drop(guard);

            // a change may have slipped in between the last read and the unlock
            if latest().0 <= self.delivered.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn try_deliver(&self) -> Option<MutexGuard<'_, ()>> {
        match self.delivering.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn callbacks(&self) -> Vec<Callback<T>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
