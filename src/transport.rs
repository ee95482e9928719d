//! Chat transport seam
//!
//! The connection to the chat network, message framing and the direct-transfer
//! byte protocol live outside this crate. An adapter implements [`Transport`]
//! for sending commands, and hands every unsolicited transfer offer to the
//! [`OfferSink`](crate::correlator::OfferSink) it was given in
//! [`Transport::subscribe_offers`].

use crate::correlator::OfferSink;
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared handle to an offer; cloned between the correlator and the pipeline
pub type OfferHandle = Arc<dyn TransferOffer>;

/// An unsolicited offer from a remote peer to stream one named file
///
/// Owned by the transport adapter. The pipeline calls [`start_download`](Self::start_download)
/// at most once per offer.
#[async_trait]
pub trait TransferOffer: Send + Sync {
    /// File name announced by the peer; matched exactly against pending requests
    fn name(&self) -> &str;

    /// Size in bytes announced by the peer
    fn declared_size(&self) -> u64;

    /// Stream the file into `dest_dir` and return the local path once complete
    ///
    /// # Errors
    ///
    /// Any I/O or protocol error during the transfer. The pipeline records it as
    /// a transfer failure.
    async fn start_download(&self, dest_dir: &Path) -> std::io::Result<PathBuf>;
}

/// Connection to the chat network
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use xdcc_dl::correlator::OfferSink;
/// use xdcc_dl::error::TransportError;
/// use xdcc_dl::transport::Transport;
///
/// struct LoggingTransport;
///
/// #[async_trait]
/// impl Transport for LoggingTransport {
///     fn is_connected(&self) -> bool {
///         true
///     }
///
///     async fn connect(&self) -> Result<(), TransportError> {
///         Ok(())
///     }
///
///     async fn send_command(&self, text: &str, target: &str) -> Result<(), TransportError> {
///         println!("PRIVMSG {target} :{text}");
///         Ok(())
///     }
///
///     fn subscribe_offers(&self, _sink: OfferSink) {}
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the connection is currently up
    fn is_connected(&self) -> bool;

    /// Connect to the network; must be a no-op when already connected
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send a chat message to `target`
    ///
    /// Fire-and-forget at the protocol level: success only means the message
    /// was handed to the network.
    async fn send_command(&self, text: &str, target: &str) -> Result<(), TransportError>;

    /// Register the receiver for transfer offers
    ///
    /// The adapter calls [`OfferSink::offer_received`] from its event-delivery
    /// path for every offer. That call never blocks on downstream work.
    fn subscribe_offers(&self, sink: OfferSink);

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "transport"
    }
}
