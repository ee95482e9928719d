//! Pending-request registry
//!
//! Maps a file identity to the single in-flight acquisition for it. All
//! operations take one lock over the map and finish in constant time, so the
//! transport's event path can resolve offers without waiting on downstream work.
//!
//! Each slot carries two one-way signals:
//! - the offer, delivered once to the acquisition that issued the command
//!   (a `oneshot` owned by the map entry, so [`PendingRegistry::resolve`] is
//!   exactly-once by construction)
//! - the outcome, observed by every caller that created or joined the slot
//!   (a `watch` channel, so late joiners still see it)

use crate::transport::OfferHandle;
use crate::types::{FailureKind, Outcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};

/// One in-flight acquisition for a file identity
#[derive(Debug)]
pub struct PendingSlot {
    identity: String,
    created_at: DateTime<Utc>,
    outcome_tx: watch::Sender<Option<Outcome>>,
}

impl PendingSlot {
    fn new(identity: &str) -> Self {
        let (outcome_tx, _rx) = watch::channel(None);
        Self {
            identity: identity.to_string(),
            created_at: Utc::now(),
            outcome_tx,
        }
    }

    /// File identity this slot was created for
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// When the slot was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Handle that resolves once the acquisition finishes
    pub fn subscribe(&self) -> DownloadHandle {
        DownloadHandle {
            file_name: self.identity.clone(),
            outcome_rx: self.outcome_tx.subscribe(),
        }
    }

    /// Publish the final outcome; only the first call has an effect
    fn publish(&self, outcome: Outcome) -> bool {
        self.outcome_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        })
    }

    /// Outcome, if the acquisition already finished
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome_tx.borrow().clone()
    }
}

/// Awaitable view of an acquisition's final outcome
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    file_name: String,
    outcome_rx: watch::Receiver<Option<Outcome>>,
}

impl DownloadHandle {
    /// File name this handle tracks
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Wait until the acquisition reaches `Available` or `Failed`
    pub async fn wait(mut self) -> Outcome {
        let outcome = match self.outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Outcome::failed(
                FailureKind::Internal,
                "acquisition ended without publishing an outcome",
            )
        })
    }
}

/// Result of [`PendingRegistry::accept_or_join`]
pub enum Admission {
    /// No slot existed; the caller owns the acquisition and must issue the command
    Created {
        /// The new slot
        slot: Arc<PendingSlot>,
        /// Resolved by the correlator when a matching offer arrives
        offer_rx: oneshot::Receiver<OfferHandle>,
    },
    /// A slot already existed; the caller only observes its outcome
    Joined {
        /// The existing slot
        slot: Arc<PendingSlot>,
    },
}

impl Admission {
    /// Whether this call created the slot
    pub fn is_new(&self) -> bool {
        matches!(self, Admission::Created { .. })
    }

    /// The slot created or joined
    pub fn slot(&self) -> &Arc<PendingSlot> {
        match self {
            Admission::Created { slot, .. } | Admission::Joined { slot } => slot,
        }
    }
}

struct RegistryEntry {
    slot: Arc<PendingSlot>,
    /// Taken by the first matching offer
    offer_tx: Option<oneshot::Sender<OfferHandle>>,
}

/// Concurrency-safe map from file identity to its pending slot
#[derive(Default)]
pub struct PendingRegistry {
    slots: Mutex<HashMap<String, RegistryEntry>>,
}

impl PendingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic, so a poisoned map is still consistent
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a slot for `identity`, or join the one that already exists
    ///
    /// Check and insert happen under one lock, so concurrent callers for the
    /// same identity get exactly one [`Admission::Created`].
    pub fn accept_or_join(&self, identity: &str) -> Admission {
        let mut slots = self.lock();
        match slots.entry(identity.to_string()) {
            Entry::Occupied(entry) => Admission::Joined {
                slot: entry.get().slot.clone(),
            },
            Entry::Vacant(entry) => {
                let slot = Arc::new(PendingSlot::new(identity));
                let (offer_tx, offer_rx) = oneshot::channel();
                entry.insert(RegistryEntry {
                    slot: slot.clone(),
                    offer_tx: Some(offer_tx),
                });
                Admission::Created { slot, offer_rx }
            }
        }
    }

    /// Hand `offer` to the slot waiting for `identity`
    ///
    /// Returns false when no slot exists, the slot was already resolved, or its
    /// owner stopped waiting. The offer is dropped in every such case.
    pub fn resolve(&self, identity: &str, offer: OfferHandle) -> bool {
        let mut slots = self.lock();
        let Some(entry) = slots.get_mut(identity) else {
            return false;
        };
        match entry.offer_tx.take() {
            Some(offer_tx) => offer_tx.send(offer).is_ok(),
            None => false,
        }
    }

    /// Detach the slot for `identity` so the identity can be requested again
    pub fn remove(&self, identity: &str) -> Option<Arc<PendingSlot>> {
        self.lock().remove(identity).map(|entry| entry.slot)
    }

    /// Detach `slot` only if it is still the registered slot for its identity
    fn remove_slot(&self, slot: &Arc<PendingSlot>) -> bool {
        let mut slots = self.lock();
        match slots.get(slot.identity()) {
            Some(entry) if Arc::ptr_eq(&entry.slot, slot) => {
                slots.remove(slot.identity());
                true
            }
            _ => false,
        }
    }

    /// Whether a slot exists for `identity`
    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    /// Number of in-flight identities
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of in-flight identities
    pub fn identities(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

/// Ownership of a created slot for the lifetime of its acquisition
///
/// [`finish`](Self::finish) publishes the outcome and detaches the slot. If the
/// guard is dropped first (early return, panic, cancelled task), it publishes
/// an internal failure so no joined caller waits forever.
pub(crate) struct SlotGuard {
    registry: Arc<PendingRegistry>,
    slot: Arc<PendingSlot>,
    finished: bool,
}

impl SlotGuard {
    pub(crate) fn new(registry: Arc<PendingRegistry>, slot: Arc<PendingSlot>) -> Self {
        Self {
            registry,
            slot,
            finished: false,
        }
    }

    pub(crate) fn identity(&self) -> &str {
        self.slot.identity()
    }

    /// Publish `outcome` to every waiter and detach the slot
    pub(crate) fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.release(outcome);
    }

    fn release(&self, outcome: Outcome) {
        // Remove before publishing so a waiter that re-requests sees no slot
        self.registry.remove_slot(&self.slot);
        self.slot.publish(outcome);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                file_name = %self.slot.identity(),
                "Pending slot released without an outcome"
            );
            self.release(Outcome::failed(
                FailureKind::Internal,
                "acquisition was dropped before completing",
            ));
        }
    }
}
