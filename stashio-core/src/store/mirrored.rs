use super::BlobStore;
use crate::blob::{Blob, BlobId, BlobStoreMetrics, Headers};
use crate::error::Result;
use crate::spool::{SpoolKind, StreamCopier};
use std::io::Read;

/// Prefix of the header recording a blob's id in the mirror store. The full
/// key is `blobId-in-store:<store id>`.
pub const MIRROR_ID_KEY_PREFIX: &str = "blobId-in-store:";

/// Writes every blob to two stores and reads from the primary.
///
/// The input is teed through a spool while the mirror consumes it, then the
/// spooled copy is written to the primary. The primary's blob carries the
/// mirror's id under [`MirroredBlobStore::mirror_id_key`], which is how
/// deletes find the mirror copy. Mirrored stores nest, each level adding its
/// own key.
pub struct MirroredBlobStore<P, M> {
    store_id: String,
    primary: P,
    mirror: M,
    spool: SpoolKind,
}

impl<P: BlobStore, M: BlobStore> MirroredBlobStore<P, M> {
    pub fn new(store_id: impl Into<String>, primary: P, mirror: M) -> Self {
        Self {
            store_id: store_id.into(),
            primary,
            mirror,
            spool: SpoolKind::default(),
        }
    }

    pub fn with_spool(mut self, spool: SpoolKind) -> Self {
        self.spool = spool;
        self
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn mirror_id_key(&self) -> String {
        format!("{}{}", MIRROR_ID_KEY_PREFIX, self.store_id)
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    fn primary_headers(&self, blob_id: &BlobId, hard: bool) -> Result<Option<Headers>> {
        if hard {
            return self.primary.headers_unlocked(blob_id);
        }
        self.primary.get(blob_id)?.map(|blob| blob.headers()).transpose()
    }

    fn remove(&self, blob_id: &BlobId, hard: bool) -> Result<bool> {
        let Some(headers) = self.primary_headers(blob_id, hard)? else {
            return Ok(false);
        };

        let key = self.mirror_id_key();
        let mirror_id = headers.get(&key).cloned().map(BlobId::new).transpose()?;

        let deleted = if hard {
            self.primary.delete_hard(blob_id)?
        } else {
            self.primary.delete(blob_id)?
        };

        match mirror_id {
            Some(mirror_id) => {
                let mirror_deleted = if hard {
                    self.mirror.delete_hard(&mirror_id)?
                } else {
                    self.mirror.delete(&mirror_id)?
                };
                if !mirror_deleted {
                    tracing::warn!(
                        "Mirror copy {} of blob {} was already gone from store {}",
                        mirror_id,
                        blob_id,
                        self.store_id
                    );
                }
            }
            None => tracing::warn!(
                "Blob {} has no {} header; its mirror copy can't be located",
                blob_id,
                key
            ),
        }
        Ok(deleted)
    }
}

impl<P: BlobStore, M: BlobStore> BlobStore for MirroredBlobStore<P, M> {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        let mut copier = StreamCopier::new(content, self.spool.create()?);
        let mirrored = self.mirror.create(&mut copier, headers)?;
        // Drain anything the mirror left unread so the copy is complete.
        std::io::copy(&mut copier, &mut std::io::sink())?;
        let mut copy = copier.into_copied_stream()?;

        let mut primary_headers = headers.clone();
        primary_headers.insert(self.mirror_id_key(), mirrored.id().to_string());

        match self.primary.create(&mut copy, &primary_headers) {
            Ok(blob) => {
                tracing::debug!(
                    "Mirrored blob {} as {} in store {}",
                    blob.id(),
                    mirrored.id(),
                    self.store_id
                );
                Ok(blob)
            }
            Err(error) => {
                tracing::error!(
                    "Primary write failed in store {}, removing mirror copy {}: {}",
                    self.store_id,
                    mirrored.id(),
                    error
                );
                if let Err(cleanup) = self.mirror.delete_hard(mirrored.id()) {
                    tracing::error!(
                        "Failed to remove mirror copy {}: {}",
                        mirrored.id(),
                        cleanup
                    );
                }
                Err(error)
            }
        }
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        self.primary.get(blob_id)
    }

    /// Deletes from the primary, then the mirror copy it points to. The result
    /// is the primary's.
    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        self.remove(blob_id, false)
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        self.remove(blob_id, true)
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        self.primary.metrics()
    }

    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        self.primary.headers_unlocked(blob_id)
    }
}
