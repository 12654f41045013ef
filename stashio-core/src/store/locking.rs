use super::BlobStore;
use crate::blob::{Blob, BlobId, BlobMetrics, BlobStoreMetrics, BlobStream, Headers};
use crate::error::{Result, StashError};
use crate::locking::{LockHoldingReader, LockProvider};
use std::io::Read;
use std::sync::Arc;

/// Guards an inner store with cooperative per-blob locks.
///
/// Reads take shared locks, and an open content stream keeps its lock until
/// dropped. A normal delete refuses to wait: if any lock is held it fails with
/// [`StashError::BlobInUse`]. Creation is not locked here since the id does
/// not exist yet; an inner store that exposes new blobs to other threads
/// before returning must share this store's lock provider.
pub struct LockingBlobStore<S> {
    inner: S,
    locks: Arc<dyn LockProvider>,
}

impl<S: BlobStore> LockingBlobStore<S> {
    pub fn new(inner: S, locks: Arc<dyn LockProvider>) -> Self {
        Self { inner, locks }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BlobStore> BlobStore for LockingBlobStore<S> {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        self.inner.create(content, headers)
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        let _lock = self.locks.read_lock(blob_id);
        Ok(self.inner.get(blob_id)?.map(|blob| {
            Box::new(LockingBlob {
                blob,
                locks: self.locks.clone(),
            }) as Box<dyn Blob>
        }))
    }

    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        let Some(_lock) = self.locks.try_exclusive_lock(blob_id) else {
            tracing::debug!("Refusing to delete blob {}; it is in use", blob_id);
            return Err(StashError::BlobInUse(blob_id.clone()));
        };
        self.inner.delete(blob_id)
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        tracing::debug!("Hard deleting blob {} without locking", blob_id);
        self.inner.delete_hard(blob_id)
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        self.inner.metrics()
    }

    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        self.inner.headers_unlocked(blob_id)
    }
}

struct LockingBlob {
    blob: Box<dyn Blob>,
    locks: Arc<dyn LockProvider>,
}

impl Blob for LockingBlob {
    fn id(&self) -> &BlobId {
        self.blob.id()
    }

    fn headers(&self) -> Result<Headers> {
        let _lock = self.locks.read_lock(self.blob.id());
        self.blob.headers()
    }

    fn input_stream(&self) -> Result<BlobStream> {
        let lock = self.locks.read_lock(self.blob.id());
        let stream = self.blob.input_stream()?;
        Ok(Box::new(LockHoldingReader::new(stream, lock)))
    }

    fn metrics(&self) -> Result<BlobMetrics> {
        let _lock = self.locks.read_lock(self.blob.id());
        self.blob.metrics()
    }
}
