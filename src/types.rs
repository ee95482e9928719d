//! Core types for xdcc-dl

use crate::registry::DownloadHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A request to fetch one file from a remote bot
///
/// The file name is the identity: it keys the pending-request registry and the
/// ledger, and is matched exactly against incoming transfer offers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// File name the bot is expected to offer
    pub file_name: String,
    /// Bot nickname the command is addressed to
    pub source_target: String,
    /// Package (send-index) number on the bot
    pub package_number: u32,
}

impl DownloadRequest {
    /// Create a new request
    pub fn new(
        file_name: impl Into<String>,
        source_target: impl Into<String>,
        package_number: u32,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            source_target: source_target.into(),
            package_number,
        }
    }
}

/// Ledger status of a download record
///
/// Records move forward along `Downloading → Verifying → Publishing → Available`;
/// any non-terminal status may move to `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Bytes are being received from the remote peer
    Downloading,
    /// Digest is being computed over the received bytes
    Verifying,
    /// File is being uploaded to the storage target
    Publishing,
    /// File is published and available
    Available,
    /// Terminal failure; a fresh request is needed after the record is cleared
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Downloading,
            1 => Status::Verifying,
            2 => Status::Publishing,
            3 => Status::Available,
            4 => Status::Failed,
            _ => Status::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Downloading => 0,
            Status::Verifying => 1,
            Status::Publishing => 2,
            Status::Available => 3,
            Status::Failed => 4,
        }
    }

    /// Whether no further transitions are allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Available | Status::Failed)
    }

    /// Whether `self → next` is an allowed lifecycle step
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Downloading, Status::Verifying)
                | (Status::Verifying, Status::Publishing)
                | (Status::Publishing, Status::Available)
                | (
                    Status::Downloading | Status::Verifying | Status::Publishing,
                    Status::Failed
                )
        )
    }

    /// Statuses a crashed process can leave behind
    pub const IN_FLIGHT: [Status; 3] = [Status::Downloading, Status::Verifying, Status::Publishing];
}

/// Why a record ended up [`Status::Failed`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote bot never offered the file
    NoOfferReceived,
    /// Byte-stream I/O error
    TransferFailed,
    /// Digest or size verification error
    IntegrityFailed,
    /// Storage upload error
    PublishFailed,
    /// Left in-flight by a crash or interrupted by shutdown
    Abandoned,
    /// Pipeline fault (panic or ledger error)
    Internal,
}

impl FailureKind {
    /// Stable string form stored in the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoOfferReceived => "no_offer_received",
            FailureKind::TransferFailed => "transfer_failed",
            FailureKind::IntegrityFailed => "integrity_failed",
            FailureKind::PublishFailed => "publish_failed",
            FailureKind::Abandoned => "abandoned",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_offer_received" => Ok(FailureKind::NoOfferReceived),
            "transfer_failed" => Ok(FailureKind::TransferFailed),
            "integrity_failed" => Ok(FailureKind::IntegrityFailed),
            "publish_failed" => Ok(FailureKind::PublishFailed),
            "abandoned" => Ok(FailureKind::Abandoned),
            "internal" => Ok(FailureKind::Internal),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

/// Final result of one acquisition, shared with every caller that joined it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// File was published
    Available {
        /// Canonical storage path returned by the storage target
        storage_path: String,
        /// Uppercase hex SHA-256 of the content
        digest: String,
    },
    /// Attempt failed terminally
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable reason
        message: String,
    },
}

impl Outcome {
    pub(crate) fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            message: message.into(),
        }
    }

    /// Whether the file ended up available
    pub fn is_available(&self) -> bool {
        matches!(self, Outcome::Available { .. })
    }
}

/// What [`request_download`](crate::XdccDownloader::request_download) did with a request
#[derive(Debug)]
pub enum Submission {
    /// A ledger record already exists; nothing was sent
    Duplicate {
        /// Status of the existing record
        status: Status,
    },
    /// This call issued the chat command
    Issued(DownloadHandle),
    /// Another caller already issued the command; this handle shares its outcome
    Joined(DownloadHandle),
}

impl Submission {
    /// Handle for the in-flight acquisition, if one was issued or joined
    pub fn handle(&self) -> Option<&DownloadHandle> {
        match self {
            Submission::Duplicate { .. } => None,
            Submission::Issued(handle) | Submission::Joined(handle) => Some(handle),
        }
    }

    /// Consume the submission and wait for its outcome
    ///
    /// Returns `None` for duplicates, whose outcome lives in the ledger.
    pub async fn wait(self) -> Option<Outcome> {
        match self {
            Submission::Duplicate { .. } => None,
            Submission::Issued(handle) | Submission::Joined(handle) => Some(handle.wait().await),
        }
    }
}

/// Event emitted during the acquisition lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Chat command issued to a bot
    CommandSent {
        /// Requested file name
        file_name: String,
        /// Bot the command was addressed to
        target: String,
        /// Package number requested
        package_number: u32,
        /// 1 for the first command, higher for re-sends after a timeout
        attempt: u32,
    },

    /// Offer matched a pending request
    OfferMatched {
        /// Offered file name
        file_name: String,
        /// Size declared by the remote peer
        declared_size: u64,
    },

    /// Offer arrived with no pending request and was dropped
    OfferDiscarded {
        /// Offered file name
        file_name: String,
    },

    /// Ledger record created, bytes streaming
    Downloading {
        /// File name
        file_name: String,
        /// Declared size in bytes
        size_bytes: u64,
    },

    /// Digest computation started
    Verifying {
        /// File name
        file_name: String,
    },

    /// Upload to the storage target started
    Publishing {
        /// File name
        file_name: String,
        /// Uppercase hex SHA-256
        digest: String,
    },

    /// File is published
    Available {
        /// File name
        file_name: String,
        /// Storage path returned by the target
        storage_path: String,
        /// Uppercase hex SHA-256
        digest: String,
    },

    /// Acquisition failed terminally
    Failed {
        /// File name
        file_name: String,
        /// Failure classification
        kind: FailureKind,
        /// Error message
        error: String,
    },

    /// Startup sweep marked an in-flight record left by a previous process
    Reconciled {
        /// File name
        file_name: String,
        /// Status the record was found in
        previous: Status,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
