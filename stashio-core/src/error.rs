use crate::blob::BlobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Blob {0} is in use and can't be deleted normally")]
    BlobInUse(BlobId),

    #[error("Blob {0} has been deleted")]
    BlobDeleted(BlobId),

    #[error("Corrupt headers for blob {blob_id}: {reason}")]
    CorruptHeaders { blob_id: BlobId, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StashError {
    /// True for the "resource busy" condition raised by a locking store's delete.
    pub fn is_in_use(&self) -> bool {
        matches!(self, StashError::BlobInUse(_))
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
