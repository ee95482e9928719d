//! # xdcc-dl
//!
//! Asynchronous file-acquisition pipeline for XDCC bots.
//!
//! A request names a file, the bot that serves it and its package number. The
//! pipeline sends `xdcc send #<package>` to the bot, waits for the matching
//! transfer offer, streams it to a temp directory, hashes it, publishes it to a
//! storage target and records every step in a SQLite ledger.
//!
//! ## Design Philosophy
//!
//! xdcc-dl is designed to be:
//! - **Library-first** - No CLI or UI; the chat transport and storage target are traits
//! - **Deduplicating** - At most one command per file name is ever in flight
//! - **Durable** - The ledger is the source of truth for every file's status
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use xdcc_dl::{Config, DirectoryStorage, DownloadRequest, Transport, XdccDownloader};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let storage = Arc::new(DirectoryStorage::from_config(&config.storage));
//! let downloader = XdccDownloader::new(config, transport, storage).await?;
//!
//! // Subscribe to events
//! let mut events = downloader.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let submission = downloader
//!     .request_download(DownloadRequest::new("Episode01.mkv", "Seeder1", 42))
//!     .await?;
//! if let Some(outcome) = submission.wait().await {
//!     println!("Outcome: {:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Offer-to-request correlation
pub mod correlator;
/// Download ledger persistence layer
pub mod db;
/// Transfer lifecycle orchestrator (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Digest verification and publication
pub mod finalizer;
/// Pending-request registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Publication targets
pub mod storage;
/// Chat transport seam
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use correlator::OfferSink;
pub use db::{Database, DownloadRecord, Ledger};
pub use downloader::XdccDownloader;
pub use error::{AcquisitionError, DatabaseError, DownloadError, Error, Result, TransportError};
pub use registry::DownloadHandle;
pub use storage::{DirectoryStorage, PublishFile, StorageTarget};
pub use transport::{OfferHandle, TransferOffer, Transport};
pub use types::{DownloadRequest, Event, FailureKind, Outcome, Status, Submission};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use xdcc_dl::{Config, DirectoryStorage, Transport, XdccDownloader, run_with_shutdown};
///
/// # async fn example(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let storage = Arc::new(DirectoryStorage::from_config(&config.storage));
/// let downloader = XdccDownloader::new(config, transport, storage).await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(downloader).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: XdccDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
