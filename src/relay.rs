//! ==============================================================================
//! relay.rs - relay control coordinator
//! ==============================================================================
//!
//! purpose:
//!     keeps a local engaged/disengaged view of the four relays that reacts
//!     instantly to user toggles while the backend write is still in flight.
//!
//! write path:
//!
//! ```text
//!     toggle(r) ─▶ flip r against *current* state ─▶ apply locally ─▶ return
//!                                  │
//!                                  └─▶ spawned: POST full mapping
//!                                          ├─ 2xx  ─▶ re-assert mapping sent
//!                                          └─ fail ─▶ FailurePolicy
//!
//!     every toggle of a relay bumps its generation; the relay stays
//!     `pending` until the write carrying its newest generation resolves.
//!     `Revert` only rolls a relay back when no newer toggle of it happened,
//!     so a late failure never clobbers a fresher intent.
//!
//!     confirmations may resolve out of order; each one simply re-asserts
//!     its own mapping (last write wins).
//! ```
//!
//! relationships:
//!     - talks to: RelayBackend (HttpRelayBackend in production)
//!     - read by: api.rs (views), main.rs (initial load)
//!
//! ==============================================================================

use crate::config::MonitorConfig;
use crate::domain::{RelayId, RelayState};
use crate::error::{MonitorError, Result};
use crate::observer::{ListenerId, Listeners};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// remote authority for relay state
#[async_trait]
pub trait RelayBackend: Send + Sync {
    /// current state of every relay
    async fn fetch_status(&self) -> Result<RelayState>;

    /// replace the state of every relay
    async fn update(&self, desired: &RelayState) -> Result<()>;
}

/// relay endpoints of the backend over http
pub struct HttpRelayBackend {
    client: reqwest::Client,
    status_url: String,
    update_url: String,
}

impl HttpRelayBackend {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            status_url: config.relay_status_url(),
            update_url: config.relay_update_url(),
        })
    }
}

#[async_trait]
impl RelayBackend for HttpRelayBackend {
    async fn fetch_status(&self) -> Result<RelayState> {
        let response = self.client.get(&self.status_url).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn update(&self, desired: &RelayState) -> Result<()> {
        let response = self.client.post(&self.update_url).json(desired).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// what happens to the optimistic flip when its write fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// leave the flipped value in place
    Keep,
    /// fall back to the last value the backend confirmed
    #[default]
    Revert,
}

/// result of one remote write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Confirmed,
    Failed { reverted: bool },
    /// the write task died before resolving
    Abandoned,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub state: RelayState,
    /// last state the backend acknowledged
    pub confirmed: RelayState,
    /// relays with an unresolved write, in `RelayId::ALL` order
    pub pending: [bool; 4],
}

impl RelaySnapshot {
    pub fn is_pending(&self, id: RelayId) -> bool {
        self.pending[slot(id)]
    }
}

/// one row of the control panel
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelayView {
    pub id: RelayId,
    pub name: &'static str,
    pub icon: &'static str,
    pub engaged: bool,
    pub pending: bool,
    /// what the switch widget should show
    pub switch_checked: bool,
}

fn slot(id: RelayId) -> usize {
    match id {
        RelayId::Relay1 => 0,
        RelayId::Relay2 => 1,
        RelayId::Relay3 => 2,
        RelayId::Relay4 => 3,
    }
}

#[derive(Default)]
struct Book {
    current: RelayState,
    confirmed: RelayState,
    generation: [u64; 4],
    pending: [Option<u64>; 4],
    /// bumped on every change, orders listener delivery
    version: u64,
}

impl Book {
    fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            state: self.current,
            confirmed: self.confirmed,
            pending: self.pending.map(|p| p.is_some()),
        }
    }
}

struct Shared {
    backend: Arc<dyn RelayBackend>,
    policy: FailurePolicy,
    invert_switch: bool,
    book: Mutex<Book>,
    listeners: Listeners<RelaySnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// mutate the book, then tell listeners outside the lock
    fn apply<R>(&self, f: impl FnOnce(&mut Book) -> R) -> R {
        let out = {
            let mut book = self.lock();
            let out = f(&mut book);
            book.version += 1;
            out
        };
        self.listeners.publish(|| {
            let book = self.lock();
            (book.version, book.snapshot())
        });
        out
    }
}

/// Cheap to clone; all clones share one relay book.
#[derive(Clone)]
pub struct RelayCoordinator {
    shared: Arc<Shared>,
}

/// handle on the remote half of a toggle
pub struct PendingWrite {
    pub relay: RelayId,
    /// full mapping sent to the backend
    pub requested: RelayState,
    task: JoinHandle<WriteOutcome>,
}

impl PendingWrite {
    pub async fn outcome(self) -> WriteOutcome {
        self.task.await.unwrap_or(WriteOutcome::Abandoned)
    }
}

impl RelayCoordinator {
    pub fn new(backend: Arc<dyn RelayBackend>, policy: FailurePolicy) -> Self {
        Self::build(backend, policy, false)
    }

    pub fn from_config(backend: Arc<dyn RelayBackend>, config: &MonitorConfig) -> Self {
        Self::build(backend, config.relays.on_failure, config.relays.invert_switch)
    }

    fn build(backend: Arc<dyn RelayBackend>, policy: FailurePolicy, invert_switch: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                policy,
                invert_switch,
                book: Mutex::new(Book::default()),
                listeners: Listeners::default(),
            }),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.shared.policy
    }

    /// Replace local state with the backend's snapshot.
    ///
    /// failure is logged and leaves the current (default) state alone.
    /// returns whether the snapshot was applied.
    pub async fn load_initial(&self) -> bool {
        match self.shared.backend.fetch_status().await {
            Ok(state) => {
                tracing::info!(?state, "relay status loaded");
                self.shared.apply(|book| {
                    book.current = state;
                    book.confirmed = state;
                });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch relay status, keeping defaults");
                false
            }
        }
    }

    /// Flip one relay now and persist the full mapping in the background.
    ///
    /// the local change is visible before this returns. must be called
    /// inside a tokio runtime.
    pub fn toggle(&self, relay: RelayId) -> PendingWrite {
        let (requested, generation) = self.shared.apply(|book| {
            let next = book.current.flipped(relay);
            book.current = next;
            let i = slot(relay);
            book.generation[i] += 1;
            book.pending[i] = Some(book.generation[i]);
            (next, book.generation[i])
        });
        tracing::info!(%relay, engaged = requested.get(relay), "relay toggled");
        tracing::debug!(?requested, "sending relay update");

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let result = shared.backend.update(&requested).await;
            Self::settle(&shared, relay, generation, requested, result)
        });

        PendingWrite { relay, requested, task }
    }

    fn settle(
        shared: &Shared,
        relay: RelayId,
        generation: u64,
        requested: RelayState,
        result: Result<()>,
    ) -> WriteOutcome {
        let i = slot(relay);
        match result {
            Ok(()) => {
                shared.apply(|book| {
                    book.current = requested;
                    book.confirmed = requested;
                    if book.pending[i] == Some(generation) {
                        book.pending[i] = None;
                    }
                });
                tracing::debug!(%relay, "relay update confirmed");
                WriteOutcome::Confirmed
            }
            Err(e) => {
                let reverted = shared.apply(|book| {
                    if book.pending[i] != Some(generation) {
                        // a newer toggle of this relay owns its state now
                        return false;
                    }
                    book.pending[i] = None;
                    if shared.policy == FailurePolicy::Revert {
                        let confirmed = book.confirmed.get(relay);
                        let changed = book.current.get(relay) != confirmed;
                        book.current.set(relay, confirmed);
                        changed
                    } else {
                        false
                    }
                });
                tracing::error!(%relay, error = %e, reverted, "error updating relays");
                WriteOutcome::Failed { reverted }
            }
        }
    }

    pub fn state(&self) -> RelayState {
        self.shared.lock().current
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        self.shared.lock().snapshot()
    }

    pub fn views(&self) -> Vec<RelayView> {
        let snapshot = self.snapshot();
        let invert = self.shared.invert_switch;
        RelayId::ALL
            .into_iter()
            .map(|id| {
                let engaged = snapshot.state.get(id);
                RelayView {
                    id,
                    name: id.name(),
                    icon: id.icon(),
                    engaged,
                    pending: snapshot.is_pending(id),
                    switch_checked: engaged != invert,
                }
            })
            .collect()
    }

    /// Register a callback run with the newest snapshot after state changes
    ///
    /// snapshots arrive in the order the changes were made; changes racing
    /// on other threads may be folded into one call.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RelaySnapshot) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }
}
