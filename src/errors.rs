//! Typed error hierarchy for flag synchronization.
//!
//! Only the failures a caller must act on live here. Read-side problems
//! (document missing, torn document) never become errors; they are logged
//! and the caller keeps its last known flags.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the flag document, the backing store and the synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown flag '{field}'")]
    UnknownField { field: String },

    #[error("Invalid value for flag '{field}': {message}")]
    InvalidFieldValue { field: String, message: String },

    #[error("Flag '{field}' is not a finite number and cannot be published")]
    NonFiniteValue { field: String },

    #[error("Failed to serialize flags: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write flags to {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run RAM disk helper {helper}: {source}")]
    HelperSpawn {
        helper: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("RAM disk helper {helper} failed to {action} ({status})")]
    ProvisionFailed {
        helper: PathBuf,
        action: String,
        status: String,
    },

    #[error("Failed to remove flag file at {path}: {source}")]
    DecommissionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Whether the error leaves the shared document unusable for this process.
    ///
    /// Field errors are local mistakes; everything else means the channel is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::UnknownField { .. }
                | SyncError::InvalidFieldValue { .. }
                | SyncError::NonFiniteValue { .. }
        )
    }
}
