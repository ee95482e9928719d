//! Startup reconciliation and shutdown coordination.

use crate::db::RecordUpdate;
use crate::error::Result;
use crate::types::{Event, FailureKind, Status};
use std::time::Duration;

use super::XdccDownloader;

/// How long shutdown waits for pipelines to observe cancellation
pub(super) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl XdccDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new requests
    /// 2. Cancels offer waits and in-progress streams
    /// 3. Waits for every acquisition task to finish (30 second limit)
    /// 4. Marks records still in flight as `Failed`/`Abandoned`, except those
    ///    whose task is still running past the limit
    /// 5. Records the clean shutdown in the database
    ///
    /// Verification and publishing are not cancelled. A task still publishing
    /// when the limit expires keeps ownership of its record; if the process
    /// exits first, the next startup marks the record abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if recording the clean shutdown fails. The earlier steps
    /// log their failures and continue.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.lifecycle
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new requests");

        self.lifecycle.cancel.cancel();
        self.lifecycle.tasks.close();

        tracing::debug!(
            active = self.lifecycle.tasks.len(),
            "Waiting for acquisition tasks to finish"
        );
        match tokio::time::timeout(self.lifecycle.shutdown_timeout, self.lifecycle.tasks.wait())
            .await
        {
            Ok(()) => tracing::info!("All acquisition tasks finished"),
            Err(_) => tracing::warn!(
                remaining = self.lifecycle.tasks.len(),
                "Timeout waiting for acquisition tasks, proceeding with shutdown"
            ),
        }

        match self
            .abandon_in_flight("interrupted by shutdown")
            .await
        {
            Ok(0) => tracing::debug!("No in-flight records left"),
            Ok(count) => tracing::info!(count, "Marked interrupted downloads as abandoned"),
            Err(e) => tracing::error!(error = %e, "Failed to mark interrupted downloads"),
        }

        self.db.set_clean_shutdown().await?;
        tracing::info!("Marked clean shutdown in database");

        self.emit(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Mark records left in flight by a previous process as abandoned
    ///
    /// Runs once from [`new`](Self::new). Records whose acquisition is still
    /// pending in this process are skipped, so calling it later is safe.
    /// Returns the number of records marked.
    pub async fn reconcile_abandoned(&self) -> Result<usize> {
        let count = self
            .abandon_in_flight("left in flight by a previous session")
            .await?;
        if count > 0 {
            tracing::warn!(count, "Reconciled abandoned downloads");
        }
        Ok(count)
    }

    /// Fail every in-flight record whose acquisition is not running in this process
    async fn abandon_in_flight(&self, reason: &str) -> Result<usize> {
        let mut count = 0;

        for status in Status::IN_FLIGHT {
            for record in self.ledger.list_by_status(status).await? {
                if self.registry.contains(&record.name) {
                    continue;
                }

                let update =
                    RecordUpdate::fail(&record.name, status, FailureKind::Abandoned, reason);
                if let Err(e) = self.ledger.update(&update).await {
                    // The owning pipeline moved it first
                    tracing::debug!(file_name = %record.name, error = %e, "Skipping record");
                    continue;
                }

                tracing::info!(
                    file_name = %record.name,
                    previous = ?status,
                    "Marked download as abandoned"
                );
                self.emit(Event::Reconciled {
                    file_name: record.name.clone(),
                    previous: status,
                });
                count += 1;
            }
        }

        Ok(count)
    }
}
