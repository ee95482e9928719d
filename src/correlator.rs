//! Offer-to-request correlator
//!
//! The transport adapter calls [`OfferSink::offer_received`] for every transfer
//! offer. The sink resolves the matching pending slot by exact file name and
//! returns; streaming happens on the acquisition's own task, never on the
//! transport's event-delivery path.

use crate::registry::PendingRegistry;
use crate::transport::OfferHandle;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Receiver for transport offer events (cloneable)
#[derive(Clone)]
pub struct OfferSink {
    registry: Arc<PendingRegistry>,
    event_tx: broadcast::Sender<Event>,
}

impl OfferSink {
    pub(crate) fn new(registry: Arc<PendingRegistry>, event_tx: broadcast::Sender<Event>) -> Self {
        Self { registry, event_tx }
    }

    /// Correlate one offer with its pending request
    ///
    /// Returns true if a waiting request took the offer. Unmatched offers are
    /// stale or were never requested by this process; they are dropped.
    pub fn offer_received(&self, offer: OfferHandle) -> bool {
        let file_name = offer.name().to_string();
        let declared_size = offer.declared_size();

        if self.registry.resolve(&file_name, offer) {
            tracing::info!(
                file_name = %file_name,
                declared_size,
                "Transfer offer matched pending request"
            );
            self.event_tx
                .send(Event::OfferMatched {
                    file_name,
                    declared_size,
                })
                .ok();
            true
        } else {
            tracing::debug!(file_name = %file_name, "Discarding unsolicited transfer offer");
            self.event_tx.send(Event::OfferDiscarded { file_name }).ok();
            false
        }
    }

    /// Drain offers from a channel until every sender is dropped
    ///
    /// For adapters that publish offers on an `mpsc` channel instead of calling
    /// the sink directly.
    pub fn spawn_listener(
        self,
        mut offers: mpsc::UnboundedReceiver<OfferHandle>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(offer) = offers.recv().await {
                self.offer_received(offer);
            }
            tracing::debug!("Offer channel closed, correlator listener exiting");
        })
    }
}
