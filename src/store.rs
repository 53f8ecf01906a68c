//! ==============================================================================
//! store.rs - bounded telemetry window
//! ==============================================================================
//!
//! purpose:
//!     keeps the last `capacity` sensor readings (oldest first) plus the
//!     single newest reading. fed only by normalized batches from the
//!     telemetry channel; everything else gets read-only snapshots.
//!
//! ordering:
//!     batches are applied in the order `ingest` is called. with the default
//!     `Append` policy nothing is reconciled: a backlog arriving after a live
//!     update is appended as-is (last applied wins). `Monotonic` drops any
//!     reading whose id is not above the highest id already seen.
//!
//! relationships:
//!     - fed by: channel.rs (through the handler installed in monitor.rs)
//!     - read by: api.rs, main.rs
//!
//! ==============================================================================

use crate::domain::SensorReading;
use crate::observer::{ListenerId, Listeners};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// how incoming batches are merged into the window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestPolicy {
    /// append everything in arrival order
    #[default]
    Append,
    /// keep the window deduplicated and strictly increasing by id
    Monotonic,
}

/// point-in-time copy of the store handed to readers
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub latest: Option<SensorReading>,
    /// chronological, oldest first
    pub window: Vec<SensorReading>,
}

#[derive(Default)]
struct Window {
    readings: VecDeque<SensorReading>,
    latest: Option<SensorReading>,
    max_id: Option<u64>,
    version: u64,
}

impl Window {
    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            latest: self.latest.clone(),
            window: self.readings.iter().cloned().collect(),
        }
    }
}

pub struct TelemetryStore {
    capacity: usize,
    policy: IngestPolicy,
    inner: Mutex<Window>,
    listeners: Listeners<TelemetrySnapshot>,
}

impl TelemetryStore {
    /// a zero `capacity` is raised to one
    pub fn new(capacity: usize, policy: IngestPolicy) -> Self {
        if capacity == 0 {
            tracing::warn!("telemetry window capacity of 0 raised to 1");
        }
        let capacity = capacity.max(1);
        Self {
            capacity,
            policy,
            inner: Mutex::new(Window {
                readings: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            listeners: Listeners::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> IngestPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one chronological batch.
    ///
    /// returns true when the store changed; an empty batch (or, under
    /// `Monotonic`, a batch of already-seen ids) leaves it untouched.
    pub fn ingest(&self, batch: &[SensorReading]) -> bool {
        if batch.is_empty() {
            return false;
        }

        {
            let mut window = self.lock();

            let accepted: Vec<&SensorReading> = match self.policy {
                IngestPolicy::Append => batch.iter().collect(),
                IngestPolicy::Monotonic => {
                    let mut max = window.max_id;
                    batch
                        .iter()
                        .filter(|r| {
                            let fresh = max.map_or(true, |m| r.id > m);
                            if fresh {
                                max = Some(r.id);
                            }
                            fresh
                        })
                        .collect()
                }
            };

            let Some(newest) = accepted.last() else {
                tracing::debug!(size = batch.len(), "batch held no new readings");
                return false;
            };
            window.latest = Some((*newest).clone());

            for reading in accepted {
                window.max_id = Some(window.max_id.map_or(reading.id, |m| m.max(reading.id)));
                window.readings.push_back(reading.clone());
            }
            while window.readings.len() > self.capacity {
                window.readings.pop_front();
            }
            window.version += 1;
        }

        self.listeners.publish(|| {
            let window = self.lock();
            (window.version, window.snapshot())
        });
        true
    }

    pub fn latest(&self) -> Option<SensorReading> {
        self.lock().latest.clone()
    }

    pub fn window(&self) -> Vec<SensorReading> {
        self.lock().readings.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.lock().snapshot()
    }

    /// Register a callback run with the newest snapshot after changes
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TelemetrySnapshot) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reading(id: u64) -> SensorReading {
        SensorReading {
            id,
            timestamp: format!("12:{:02}", id % 60),
            temperature: 20.0 + id as f64 / 10.0,
            humidity: 50.0,
        }
    }

    fn batch(ids: impl IntoIterator<Item = u64>) -> Vec<SensorReading> {
        ids.into_iter().map(reading).collect()
    }

    fn ids(store: &TelemetryStore) -> Vec<u64> {
        store.window().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_single_batch_into_empty_store() {
        for size in [1u64, 7, 15, 16, 40] {
            let store = TelemetryStore::new(15, IngestPolicy::Append);
            let b = batch(1..=size);
            assert!(store.ingest(&b));
            assert_eq!(store.len(), (size as usize).min(15));
            assert_eq!(store.latest(), b.last().cloned());
        }
    }

    #[test]
    fn test_overflow_keeps_last_n_in_order() {
        let store = TelemetryStore::new(15, IngestPolicy::Append);
        store.ingest(&batch(1..=10));
        store.ingest(&batch(11..=12));
        store.ingest(&batch(13..=20));

        assert_eq!(ids(&store), (6..=20).collect::<Vec<_>>());
        assert_eq!(store.latest().map(|r| r.id), Some(20));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let store = TelemetryStore::new(15, IngestPolicy::Append);
        store.ingest(&batch(1..=3));
        let before = store.snapshot();

        assert!(!store.ingest(&[]));
        assert_eq!(store.snapshot(), before);

        let empty = TelemetryStore::new(15, IngestPolicy::Append);
        assert!(!empty.ingest(&[]));
        assert!(empty.latest().is_none());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_append_does_not_reconcile_late_backlog() {
        let store = TelemetryStore::new(15, IngestPolicy::Append);
        store.ingest(&batch([10]));
        store.ingest(&batch(7..=10));

        assert_eq!(ids(&store), vec![10, 7, 8, 9, 10]);
        assert_eq!(store.latest().map(|r| r.id), Some(10));
    }

    #[test]
    fn test_monotonic_drops_seen_ids() {
        let store = TelemetryStore::new(15, IngestPolicy::Monotonic);
        store.ingest(&batch([10]));
        assert!(store.ingest(&batch(7..=12)));
        assert_eq!(ids(&store), vec![10, 11, 12]);

        assert!(!store.ingest(&batch(3..=12)));
        assert_eq!(store.latest().map(|r| r.id), Some(12));
    }

    #[test]
    fn test_monotonic_survives_trimmed_history() {
        let store = TelemetryStore::new(3, IngestPolicy::Monotonic);
        store.ingest(&batch(1..=5));
        assert_eq!(ids(&store), vec![3, 4, 5]);
        // ids 1 and 2 were trimmed but are still older than what we hold
        assert!(!store.ingest(&batch([1, 2])));
        assert_eq!(ids(&store), vec![3, 4, 5]);
    }

    #[test]
    fn test_listeners_see_each_change() {
        let store = TelemetryStore::new(2, IngestPolicy::Append);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = store.subscribe(move |snap| {
            assert!(snap.window.len() <= 2);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.ingest(&batch(1..=3));
        store.ingest(&[]);
        store.ingest(&batch([4]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        store.unsubscribe(id);
        store.ingest(&batch([5]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_capacity_holds_one_reading() {
        let store = TelemetryStore::new(0, IngestPolicy::Append);
        assert_eq!(store.capacity(), 1);

        assert!(store.ingest(&batch(1..=3)));
        assert_eq!(ids(&store), vec![3]);
        assert_eq!(store.latest().map(|r| r.id), Some(3));
    }
}
