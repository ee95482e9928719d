//! Supervised acquisition task: offer wait, stream, verify, publish.
//!
//! One task per issued command. Every exit path, including a panic, ends with
//! the slot guard publishing an outcome, and every failure after the ledger
//! record exists moves that record to `Failed`.

use crate::db::{NewDownloadRecord, RecordUpdate};
use crate::error::{AcquisitionError, Error, Result};
use crate::finalizer::Finalized;
use crate::registry::SlotGuard;
use crate::retry::Backoff;
use crate::transport::OfferHandle;
use crate::types::{DownloadRequest, Event, FailureKind, Outcome, Status};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;

use super::XdccDownloader;

/// Why waiting for an offer ended without one
#[derive(Debug)]
enum OfferWait {
    /// Every command went unanswered
    TimedOut { attempts: u32 },
    /// Shutdown cancelled the wait
    Cancelled,
    /// The slot was detached from the registry
    Detached,
}

/// Failure after the ledger record was created
#[derive(Debug)]
enum StageError {
    Acquisition(AcquisitionError),
    Ledger(Error),
    Cancelled,
}

impl StageError {
    fn kind(&self) -> FailureKind {
        match self {
            StageError::Acquisition(e) => e.kind(),
            StageError::Ledger(_) => FailureKind::Internal,
            StageError::Cancelled => FailureKind::Abandoned,
        }
    }

    fn message(&self) -> String {
        match self {
            StageError::Acquisition(e) => e.to_string(),
            StageError::Ledger(e) => e.to_string(),
            StageError::Cancelled => "interrupted by shutdown".to_string(),
        }
    }
}

impl From<AcquisitionError> for StageError {
    fn from(e: AcquisitionError) -> Self {
        StageError::Acquisition(e)
    }
}

impl From<Error> for StageError {
    fn from(e: Error) -> Self {
        StageError::Ledger(e)
    }
}

impl XdccDownloader {
    /// Spawn the acquisition pipeline on the task tracker
    pub(crate) fn spawn_acquisition(
        &self,
        request: DownloadRequest,
        guard: SlotGuard,
        offer_rx: oneshot::Receiver<OfferHandle>,
    ) {
        let downloader = self.clone();
        self.lifecycle.tasks.spawn(async move {
            let result = AssertUnwindSafe(downloader.run_acquisition(&request, offer_rx))
                .catch_unwind()
                .await;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = format!("acquisition panicked: {}", panic_message(&*panic));
                    tracing::error!(
                        file_name = %guard.identity(),
                        error = %message,
                        "Acquisition task panicked"
                    );
                    downloader
                        .fail_current(&request.file_name, FailureKind::Internal, &message)
                        .await;
                    downloader.emit(Event::Failed {
                        file_name: request.file_name.clone(),
                        kind: FailureKind::Internal,
                        error: message.clone(),
                    });
                    Outcome::failed(FailureKind::Internal, message)
                }
            };

            guard.finish(outcome);
        });
    }

    /// Drive one request from issued command to a terminal outcome
    async fn run_acquisition(
        &self,
        request: &DownloadRequest,
        offer_rx: oneshot::Receiver<OfferHandle>,
    ) -> Outcome {
        let name = request.file_name.as_str();

        let offer = match self.await_offer(request, offer_rx).await {
            Ok(offer) => offer,
            Err(OfferWait::TimedOut { attempts }) => {
                let error = AcquisitionError::NoOfferReceived {
                    name: name.to_string(),
                    attempts,
                };
                tracing::error!(file_name = %name, attempts, "No offer received, giving up");
                let record = NewDownloadRecord::failed(
                    name,
                    &request.source_target,
                    request.package_number,
                    error.kind(),
                    error.to_string(),
                );
                if let Err(e) = self.ledger.insert(&record).await {
                    tracing::error!(
                        file_name = %name,
                        error = %e,
                        "Failed to record missing offer in ledger"
                    );
                }
                return self.failed(name, error.kind(), error.to_string());
            }
            Err(OfferWait::Cancelled) => {
                tracing::info!(file_name = %name, "Offer wait cancelled by shutdown");
                return self.failed(
                    name,
                    FailureKind::Abandoned,
                    "shutdown before an offer arrived".to_string(),
                );
            }
            Err(OfferWait::Detached) => {
                return self.failed(
                    name,
                    FailureKind::Internal,
                    "pending slot was removed before an offer arrived".to_string(),
                );
            }
        };

        let declared_size = offer.declared_size();
        let record = NewDownloadRecord::downloading(
            name,
            &request.source_target,
            request.package_number,
            declared_size,
        );
        if let Err(e) = self.ledger.insert(&record).await {
            tracing::error!(file_name = %name, error = %e, "Failed to create ledger record");
            return self.failed(name, FailureKind::Internal, e.to_string());
        }

        tracing::info!(file_name = %name, size_bytes = declared_size, "Downloading");
        self.emit(Event::Downloading {
            file_name: name.to_string(),
            size_bytes: declared_size,
        });

        let mut stage = Status::Downloading;
        match self.process_offer(name, &offer, &mut stage).await {
            Ok(Finalized {
                digest,
                storage_path,
            }) => {
                tracing::info!(
                    file_name = %name,
                    storage_path = %storage_path,
                    digest = %digest,
                    "Download available"
                );
                self.emit(Event::Available {
                    file_name: name.to_string(),
                    storage_path: storage_path.clone(),
                    digest: digest.clone(),
                });
                Outcome::Available {
                    storage_path,
                    digest,
                }
            }
            Err(e) => {
                let (kind, message) = (e.kind(), e.message());
                let update = RecordUpdate::fail(name, stage, kind, &message);
                if let Err(ledger_err) = self.ledger.update(&update).await {
                    tracing::error!(
                        file_name = %name,
                        stage = ?stage,
                        error = %ledger_err,
                        "Failed to record failure in ledger"
                    );
                }
                self.failed(name, kind, message)
            }
        }
    }

    /// Wait for the offer, re-sending the command per `command_retry`
    async fn await_offer(
        &self,
        request: &DownloadRequest,
        mut offer_rx: oneshot::Receiver<OfferHandle>,
    ) -> std::result::Result<OfferHandle, OfferWait> {
        let retry = &self.config.download.command_retry;
        let timeout = self.config.download.offer_timeout;
        let cancel = &self.lifecycle.cancel;
        let mut backoff = Backoff::new(retry);
        let mut attempts = 1u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OfferWait::Cancelled),
                received = &mut offer_rx => return received.map_err(|_| OfferWait::Detached),
                _ = tokio::time::sleep(timeout) => {}
            }

            if attempts > retry.max_attempts {
                return Err(OfferWait::TimedOut { attempts });
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                file_name = %request.file_name,
                target = %request.source_target,
                attempt = attempts,
                delay_ms = delay.as_millis(),
                "No offer within timeout, re-sending command"
            );

            // An offer may still show up while backing off
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OfferWait::Cancelled),
                received = &mut offer_rx => return received.map_err(|_| OfferWait::Detached),
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            let command = self.config.download.render_command(request.package_number);
            match self
                .transport
                .send_command(&command, &request.source_target)
                .await
            {
                Ok(()) => self.emit(Event::CommandSent {
                    file_name: request.file_name.clone(),
                    target: request.source_target.clone(),
                    package_number: request.package_number,
                    attempt: attempts,
                }),
                Err(e) => tracing::warn!(
                    file_name = %request.file_name,
                    attempt = attempts,
                    error = %e,
                    "Failed to re-send XDCC command"
                ),
            }
        }
    }

    /// Stream, verify and publish; `stage` tracks the record's current status
    async fn process_offer(
        &self,
        name: &str,
        offer: &OfferHandle,
        stage: &mut Status,
    ) -> std::result::Result<Finalized, StageError> {
        let declared_size = offer.declared_size();

        self.check_disk_space(declared_size)
            .await
            .map_err(|e| AcquisitionError::TransferFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let temp_dir = &self.config.download.temp_dir;
        let local_path = tokio::select! {
            biased;
            _ = self.lifecycle.cancel.cancelled() => return Err(StageError::Cancelled),
            result = offer.start_download(temp_dir) => {
                result.map_err(|e| AcquisitionError::TransferFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        self.advance(RecordUpdate::advance(name, *stage, Status::Verifying), stage)
            .await?;
        self.emit(Event::Verifying {
            file_name: name.to_string(),
        });

        let verified = self.finalizer.verify(&local_path, name, declared_size).await?;

        self.advance(
            RecordUpdate::advance(name, *stage, Status::Publishing).with_digest(&verified.digest),
            stage,
        )
        .await?;
        tracing::info!(file_name = %name, digest = %verified.digest, "Publishing");
        self.emit(Event::Publishing {
            file_name: name.to_string(),
            digest: verified.digest.clone(),
        });

        let storage_path = self.finalizer.publish(&local_path, name).await?;

        self.advance(
            RecordUpdate::advance(name, *stage, Status::Available)
                .with_storage_path(&storage_path),
            stage,
        )
        .await?;

        if self.config.download.cleanup_temp_files {
            if let Err(e) = tokio::fs::remove_file(&local_path).await {
                tracing::warn!(
                    file_name = %name,
                    path = %local_path.display(),
                    error = %e,
                    "Failed to remove temp file"
                );
            }
        }

        Ok(Finalized {
            digest: verified.digest,
            storage_path,
        })
    }

    /// Apply a forward transition and track the new stage
    async fn advance(&self, update: RecordUpdate, stage: &mut Status) -> Result<()> {
        let next = update.status;
        self.ledger.update(&update).await?;
        *stage = next;
        Ok(())
    }

    /// Move whatever in-flight record exists for `name` to `Failed`
    ///
    /// Used when the pipeline's own stage tracking was lost to a panic.
    async fn fail_current(&self, name: &str, kind: FailureKind, message: &str) {
        let record = match self.ledger.find_by_key(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(file_name = %name, error = %e, "Failed to read ledger record");
                return;
            }
        };

        if record.status().is_terminal() {
            return;
        }

        let update = RecordUpdate::fail(name, record.status(), kind, message);
        if let Err(e) = self.ledger.update(&update).await {
            tracing::error!(file_name = %name, error = %e, "Failed to record failure in ledger");
        }
    }

    /// Log and emit a terminal failure, returning its outcome
    fn failed(&self, name: &str, kind: FailureKind, message: String) -> Outcome {
        tracing::error!(file_name = %name, kind = %kind, error = %message, "Acquisition failed");
        self.emit(Event::Failed {
            file_name: name.to_string(),
            kind,
            error: message.clone(),
        });
        Outcome::failed(kind, message)
    }

    /// Check that the temp directory can hold a transfer of `size_bytes`
    pub(crate) async fn check_disk_space(&self, size_bytes: u64) -> Result<()> {
        let disk_space = &self.config.disk_space;
        if !disk_space.enabled {
            return Ok(());
        }

        // Declared size × multiplier + buffer
        let required = (size_bytes as f64 * disk_space.size_multiplier) as u64;
        let required_with_buffer = required.saturating_add(disk_space.min_free_space);

        let check_path = &self.config.download.temp_dir;
        let available = crate::utils::get_available_space(check_path).map_err(|e| {
            Error::DiskSpaceCheckFailed(format!(
                "Failed to check disk space for '{}': {}",
                check_path.display(),
                e
            ))
        })?;

        if available < required_with_buffer {
            return Err(Error::InsufficientSpace {
                required: required_with_buffer,
                available,
            });
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
