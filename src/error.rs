//! Error types for xdcc-dl
//!
//! This module provides the error taxonomy for the acquisition pipeline:
//! - Top-level [`Error`] returned by public operations
//! - [`TransportError`] for the chat transport seam
//! - [`AcquisitionError`] for terminal per-attempt failures, each mapping onto a
//!   persisted [`FailureKind`]
//! - [`DatabaseError`] and [`DownloadError`] for the ledger

use crate::types::{FailureKind, Status};
use thiserror::Error;

/// Result type alias for xdcc-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xdcc-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.offer_timeout")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Chat transport error (connect or command delivery)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Terminal failure of a single acquisition attempt
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Ledger state error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Request rejected before any state was created
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage target rejected an upload
    #[error("storage error: {0}")]
    Storage(String),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Ledger record errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No ledger record exists for this file name
    #[error("download {name} not found")]
    NotFound {
        /// File name that was looked up
        name: String,
    },

    /// Status change would break lifecycle monotonicity
    #[error("invalid transition for {name}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// File name of the record
        name: String,
        /// Status the caller expected the record to be in
        from: Status,
        /// Requested new status
        to: Status,
    },

    /// Record was not in the expected status when the update was applied
    #[error("download {name} is no longer {expected:?}")]
    StatusMismatch {
        /// File name of the record
        name: String,
        /// Status the update was conditioned on
        expected: Status,
    },
}

/// Chat transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the connection to the chat network
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport is not connected
    #[error("not connected")]
    NotConnected,

    /// The command could not be handed to the network
    #[error("failed to send command to {target}: {reason}")]
    CommandFailed {
        /// Remote target (bot nickname)
        target: String,
        /// The reason delivery failed
        reason: String,
    },
}

/// Terminal failure of one acquisition attempt
///
/// Every variant is recorded in the ledger as [`Status::Failed`] with the
/// matching [`FailureKind`]; none are retried automatically.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The remote bot never offered the file
    #[error("no offer received for {name} after {attempts} command(s)")]
    NoOfferReceived {
        /// File name that was requested
        name: String,
        /// Number of commands issued before giving up
        attempts: u32,
    },

    /// Byte-stream error while receiving the file
    #[error("transfer of {name} failed: {reason}")]
    TransferFailed {
        /// File name being transferred
        name: String,
        /// The reason the transfer failed
        reason: String,
    },

    /// Digest or size verification failed
    #[error("integrity check of {name} failed: {reason}")]
    IntegrityFailed {
        /// File name being verified
        name: String,
        /// The reason verification failed
        reason: String,
    },

    /// Upload to the storage target failed
    #[error("publishing {name} failed: {reason}")]
    PublishFailed {
        /// File name being published
        name: String,
        /// The reason the upload failed
        reason: String,
    },
}

impl AcquisitionError {
    /// Failure kind persisted in the ledger for this error
    pub fn kind(&self) -> FailureKind {
        match self {
            AcquisitionError::NoOfferReceived { .. } => FailureKind::NoOfferReceived,
            AcquisitionError::TransferFailed { .. } => FailureKind::TransferFailed,
            AcquisitionError::IntegrityFailed { .. } => FailureKind::IntegrityFailed,
            AcquisitionError::PublishFailed { .. } => FailureKind::PublishFailed,
        }
    }
}
