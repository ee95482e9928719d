//! Request admission: ledger dedup, transport connect, single command issue.

use crate::db::DownloadRecord;
use crate::error::{DownloadError, Error, Result};
use crate::registry::{Admission, SlotGuard};
use crate::retry::with_retry;
use crate::types::{DownloadRequest, Event, FailureKind, Outcome, Status, Submission};
use crate::utils::validate_file_name;
use std::sync::atomic::Ordering;

use super::XdccDownloader;

impl XdccDownloader {
    /// Request a file from a bot
    ///
    /// Returns as soon as the request is admitted; the acquisition continues on
    /// its own task and its result lands in the ledger. The returned
    /// [`Submission`] tells what happened:
    /// - [`Submission::Duplicate`] if a ledger record already exists (any status);
    ///   nothing is sent
    /// - [`Submission::Issued`] if this call sent the chat command
    /// - [`Submission::Joined`] if another caller already sent it; the handle
    ///   resolves with the shared outcome
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown) started
    /// - [`Error::InvalidRequest`] for an unusable file name or target
    /// - [`Error::Transport`] if connecting or sending the command fails; no
    ///   pending state is left behind
    pub async fn request_download(&self, request: DownloadRequest) -> Result<Submission> {
        if !self.lifecycle.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        validate_file_name(&request.file_name)?;
        if request.source_target.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "source target must not be empty".to_string(),
            ));
        }

        let name = request.file_name.as_str();

        if let Some(record) = self.ledger.find_by_key(name).await? {
            tracing::debug!(
                file_name = %name,
                status = ?record.status(),
                "Ledger record exists, ignoring duplicate request"
            );
            return Ok(Submission::Duplicate {
                status: record.status(),
            });
        }

        self.ensure_connected().await?;

        let (slot, offer_rx) = match self.registry.accept_or_join(name) {
            Admission::Joined { slot } => {
                tracing::debug!(
                    file_name = %name,
                    "Joining in-flight acquisition, command already issued"
                );
                return Ok(Submission::Joined(slot.subscribe()));
            }
            Admission::Created { slot, offer_rx } => (slot, offer_rx),
        };

        let guard = SlotGuard::new(self.registry.clone(), slot.clone());
        let handle = slot.subscribe();

        // An identical request may have finished between the lookup and the slot
        match self.ledger.find_by_key(name).await {
            Ok(None) => {}
            Ok(Some(record)) => {
                let status = record.status();
                tracing::debug!(
                    file_name = %name,
                    status = ?status,
                    "Ledger record appeared during admission, releasing slot"
                );
                guard.finish(outcome_from_record(&record));
                return Ok(Submission::Duplicate { status });
            }
            Err(e) => {
                guard.finish(Outcome::failed(FailureKind::Internal, e.to_string()));
                return Err(e);
            }
        }

        let command = self.config.download.render_command(request.package_number);
        if let Err(e) = self
            .transport
            .send_command(&command, &request.source_target)
            .await
        {
            tracing::error!(
                file_name = %name,
                target = %request.source_target,
                error = %e,
                "Failed to send XDCC command"
            );
            guard.finish(Outcome::failed(
                FailureKind::TransferFailed,
                format!("command could not be sent: {}", e),
            ));
            return Err(e.into());
        }

        tracing::info!(
            file_name = %name,
            target = %request.source_target,
            package = request.package_number,
            "XDCC command sent"
        );
        self.emit(Event::CommandSent {
            file_name: request.file_name.clone(),
            target: request.source_target.clone(),
            package_number: request.package_number,
            attempt: 1,
        });

        self.spawn_acquisition(request, guard, offer_rx);

        Ok(Submission::Issued(handle))
    }

    /// Remove a failed record so the file can be requested again
    ///
    /// Returns false if no record exists.
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidTransition`] if the record is not
    /// [`Status::Failed`]; in-flight and available records are never cleared.
    pub async fn clear_failed(&self, file_name: &str) -> Result<bool> {
        let Some(record) = self.ledger.find_by_key(file_name).await? else {
            return Ok(false);
        };

        if record.status() != Status::Failed {
            return Err(Error::Download(DownloadError::InvalidTransition {
                name: file_name.to_string(),
                from: record.status(),
                to: Status::Failed,
            }));
        }

        let removed = self.ledger.delete(file_name).await?;
        tracing::info!(file_name, "Cleared failed download record");
        Ok(removed)
    }

    /// Connect the transport if needed, retrying transient failures
    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }

        tracing::info!(transport = self.transport.name(), "Connecting transport");
        let transport = self.transport.clone();
        with_retry(&self.config.download.connect_retry, || {
            let transport = transport.clone();
            async move { transport.connect().await }
        })
        .await?;

        Ok(())
    }
}

/// Outcome a ledger record implies for waiters of a released slot
fn outcome_from_record(record: &DownloadRecord) -> Outcome {
    match (record.status(), &record.storage_path, &record.digest) {
        (Status::Available, Some(storage_path), Some(digest)) => Outcome::Available {
            storage_path: storage_path.clone(),
            digest: digest.clone(),
        },
        (Status::Failed, _, _) => Outcome::failed(
            record.failure_kind().unwrap_or(FailureKind::Internal),
            record.error_message.clone().unwrap_or_default(),
        ),
        (status, _, _) => Outcome::failed(
            FailureKind::Internal,
            format!("superseded by existing {:?} record", status),
        ),
    }
}
