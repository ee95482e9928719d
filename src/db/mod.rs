//! Download ledger for xdcc-dl
//!
//! Durable, name-keyed record of every acquisition, persisted in SQLite.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`downloads`] - Download record CRUD and compare-and-set updates
//! - [`state`] - Runtime state (shutdown tracking)
//!
//! The orchestrator only sees the [`Ledger`] trait, so tests can wrap or replace
//! the SQLite store.

use crate::Result;
use crate::types::{FailureKind, Status};
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

mod downloads;
mod migrations;
mod state;

/// New download record to be inserted into the ledger
#[derive(Debug, Clone)]
pub struct NewDownloadRecord {
    /// File name; the ledger key
    pub name: String,
    /// Bot the file was requested from
    pub source_target: String,
    /// Package number on the bot
    pub package_number: u32,
    /// Declared size in bytes (0 when no offer ever arrived)
    pub size_bytes: u64,
    /// Initial status, normally [`Status::Downloading`]
    pub status: Status,
    /// Failure classification when inserted directly as [`Status::Failed`]
    pub failure_kind: Option<FailureKind>,
    /// Error message when inserted directly as [`Status::Failed`]
    pub error_message: Option<String>,
}

impl NewDownloadRecord {
    /// Record for an acquisition whose offer just arrived
    pub fn downloading(
        name: impl Into<String>,
        source_target: impl Into<String>,
        package_number: u32,
        size_bytes: u64,
    ) -> Self {
        Self {
            name: name.into(),
            source_target: source_target.into(),
            package_number,
            size_bytes,
            status: Status::Downloading,
            failure_kind: None,
            error_message: None,
        }
    }

    /// Record for an acquisition that failed before any bytes arrived
    pub fn failed(
        name: impl Into<String>,
        source_target: impl Into<String>,
        package_number: u32,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_target: source_target.into(),
            package_number,
            size_bytes: 0,
            status: Status::Failed,
            failure_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }
}

/// Download record from the ledger
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// File name; the ledger key
    pub name: String,
    /// Bot the file was requested from
    pub source_target: String,
    /// Package number on the bot
    pub package_number: i64,
    /// Declared size in bytes
    pub size_bytes: i64,
    /// Status code (see [`Status::from_i32`])
    pub status: i32,
    /// Uppercase hex SHA-256, set when verification finished
    pub digest: Option<String>,
    /// Canonical storage path, set when publication finished
    pub storage_path: Option<String>,
    /// Failure classification (see [`FailureKind::as_str`])
    pub failure_kind: Option<String>,
    /// Error message if the acquisition failed
    pub error_message: Option<String>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last status change
    pub updated_at: i64,
}

impl DownloadRecord {
    /// Decoded status
    pub fn status(&self) -> Status {
        Status::from_i32(self.status)
    }

    /// Decoded failure classification, if any
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Conditional status change for one record
///
/// Applied only if the record is still in `expected`; optional fields are left
/// untouched when `None`.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    /// File name of the record
    pub name: String,
    /// Status the record must currently be in
    pub expected: Status,
    /// New status
    pub status: Status,
    /// Digest to store
    pub digest: Option<String>,
    /// Storage path to store
    pub storage_path: Option<String>,
    /// Failure classification to store
    pub failure_kind: Option<FailureKind>,
    /// Error message to store
    pub error_message: Option<String>,
}

impl RecordUpdate {
    /// Move a record one step along the success path
    pub fn advance(name: impl Into<String>, expected: Status, status: Status) -> Self {
        Self {
            name: name.into(),
            expected,
            status,
            digest: None,
            storage_path: None,
            failure_kind: None,
            error_message: None,
        }
    }

    /// Move an in-flight record to [`Status::Failed`]
    pub fn fail(
        name: impl Into<String>,
        expected: Status,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failure_kind: Some(kind),
            error_message: Some(message.into()),
            ..Self::advance(name, expected, Status::Failed)
        }
    }

    /// Also store the content digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Also store the storage path
    pub fn with_storage_path(mut self, storage_path: impl Into<String>) -> Self {
        self.storage_path = Some(storage_path.into());
        self
    }
}

/// Keyed store of download records consumed by the orchestrator
///
/// Every method must be safe to call concurrently from many pipeline tasks;
/// the store provides atomicity per key.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up a record by file name
    async fn find_by_key(&self, name: &str) -> Result<Option<DownloadRecord>>;

    /// Insert a new record
    ///
    /// # Errors
    ///
    /// [`DatabaseError::ConstraintViolation`](crate::error::DatabaseError::ConstraintViolation)
    /// if a record with this name exists.
    async fn insert(&self, record: &NewDownloadRecord) -> Result<()>;

    /// Apply a compare-and-set status change
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidTransition`](crate::error::DownloadError::InvalidTransition)
    /// if `expected → status` breaks lifecycle monotonicity,
    /// [`DownloadError::StatusMismatch`](crate::error::DownloadError::StatusMismatch)
    /// if the record is no longer in `expected`, and
    /// [`DownloadError::NotFound`](crate::error::DownloadError::NotFound) if it does not exist.
    async fn update(&self, update: &RecordUpdate) -> Result<()>;

    /// All records currently in `status`, oldest first
    async fn list_by_status(&self, status: Status) -> Result<Vec<DownloadRecord>>;

    /// Remove a record; returns whether one existed
    ///
    /// Only used to clear `Failed` records so the file can be requested again.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Database handle for xdcc-dl
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl Ledger for Database {
    async fn find_by_key(&self, name: &str) -> Result<Option<DownloadRecord>> {
        self.get_download(name).await
    }

    async fn insert(&self, record: &NewDownloadRecord) -> Result<()> {
        self.insert_download(record).await
    }

    async fn update(&self, update: &RecordUpdate) -> Result<()> {
        self.update_download(update).await
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<DownloadRecord>> {
        self.list_downloads_by_status(status).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.delete_download(name).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
