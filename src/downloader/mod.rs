//! Transfer lifecycle orchestrator split into focused submodules.
//!
//! The `XdccDownloader` struct and its methods are organized by domain:
//! - [`request`] - Request admission: dedup, connect, command issue
//! - [`pipeline`] - Supervised acquisition task: offer wait, stream, verify, publish
//! - [`lifecycle`] - Startup reconciliation and graceful shutdown

mod lifecycle;
mod pipeline;
mod request;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::correlator::OfferSink;
use crate::db::{Database, DownloadRecord, Ledger};
use crate::error::{Error, Result};
use crate::finalizer::Finalizer;
use crate::registry::PendingRegistry;
use crate::storage::StorageTarget;
use crate::transport::Transport;
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Task supervision and shutdown state
#[derive(Clone)]
pub(crate) struct LifecycleState {
    /// Cancels offer waits and in-progress streams on shutdown
    pub(crate) cancel: CancellationToken,
    /// Every spawned acquisition pipeline
    pub(crate) tasks: TaskTracker,
    /// Flag to indicate whether new requests are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// How long shutdown waits for tasks before sweeping the ledger
    pub(crate) shutdown_timeout: Duration,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct XdccDownloader {
    /// Database instance for persistence
    /// Public for integration tests and external reconciliation
    pub db: Arc<Database>,
    /// Ledger the pipeline reads and writes (the database unless wrapped)
    pub(crate) ledger: Arc<dyn Ledger>,
    /// Chat transport adapter
    pub(crate) transport: Arc<dyn Transport>,
    /// Pending-request registry shared with the correlator
    pub(crate) registry: Arc<PendingRegistry>,
    /// Digest and upload stage
    pub(crate) finalizer: Arc<Finalizer>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Task supervision and shutdown state
    pub(crate) lifecycle: LifecycleState,
}

impl XdccDownloader {
    /// Create a new XdccDownloader instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration and creates the temp directory
    /// - Opens/creates the SQLite ledger and runs migrations
    /// - Registers the offer correlator with the transport
    /// - Marks records left in-flight by a previous process as abandoned
    ///
    /// The transport is not connected here; the first request connects it.
    pub async fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageTarget>,
    ) -> Result<Self> {
        Self::with_ledger(config, transport, storage, |db| db as Arc<dyn Ledger>).await
    }

    /// Like [`new`](Self::new), but the pipeline talks to the ledger returned by `wrap`
    ///
    /// `wrap` receives the opened database; use it to layer instrumentation or a
    /// different store over it.
    pub async fn with_ledger<F>(
        config: Config,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn StorageTarget>,
        wrap: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<Database>) -> Arc<dyn Ledger>,
    {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.download.temp_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly");
        }
        db.set_clean_start().await?;

        let db = Arc::new(db);
        let ledger = wrap(db.clone());

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let registry = Arc::new(PendingRegistry::new());
        let finalizer = Arc::new(Finalizer::new(
            storage.clone(),
            config.storage.clone(),
            &config.download,
        ));

        transport.subscribe_offers(OfferSink::new(registry.clone(), event_tx.clone()));

        tracing::info!(
            transport = transport.name(),
            storage = storage.name(),
            temp_dir = %config.download.temp_dir.display(),
            offer_timeout_secs = config.download.offer_timeout.as_secs(),
            "XDCC downloader initialized"
        );

        let downloader = Self {
            db,
            ledger,
            transport,
            registry,
            finalizer,
            event_tx,
            config: Arc::new(config),
            lifecycle: LifecycleState {
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown_timeout: lifecycle::SHUTDOWN_TIMEOUT,
            },
        };

        downloader.reconcile_abandoned().await?;

        Ok(downloader)
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Offer sink wired to this downloader's registry
    ///
    /// The same sink is handed to the transport at construction; this accessor
    /// is for adapters that are wired up separately.
    pub fn offer_sink(&self) -> OfferSink {
        OfferSink::new(self.registry.clone(), self.event_tx.clone())
    }

    /// Current ledger record for a file name
    pub async fn get_download(&self, file_name: &str) -> Result<Option<DownloadRecord>> {
        self.ledger.find_by_key(file_name).await
    }

    /// File names with an acquisition in flight in this process
    pub fn pending(&self) -> Vec<String> {
        self.registry.identities()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
