use crate::blob::BlobId;
use ulid::Ulid;

/// Generates unique blob identifiers.
pub trait BlobIdProvider: Send + Sync {
    fn next_id(&self) -> BlobId;
}

/// Hands out ULID-based ids: unique, lexically sortable by creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidBlobIdProvider;

impl BlobIdProvider for UlidBlobIdProvider {
    fn next_id(&self) -> BlobId {
        BlobId(Ulid::new().to_string())
    }
}
