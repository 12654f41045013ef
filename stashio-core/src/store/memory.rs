use super::{BlobStore, BlobStoreListener, notify};
use crate::blob::{Blob, BlobId, BlobMetrics, BlobStoreMetrics, BlobStream, Headers, SHA1};
use crate::error::Result;
use crate::storage::file_ops::compute_sha1;
use crate::storage::{BlobIdProvider, HeaderCodec, JsonHeaderCodec, UlidBlobIdProvider};
use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

struct StoredBlob {
    blob_id: BlobId,
    headers: Headers,
    content: Bytes,
    header_size: u64,
    creation_time: DateTime<Utc>,
    access: Mutex<AccessStats>,
}

#[derive(Default)]
struct AccessStats {
    count: u64,
    last: Option<DateTime<Utc>>,
}

/// Handle over a stored entry. Stays readable after the entry is deleted.
struct InMemoryBlob(Arc<StoredBlob>);

impl Blob for InMemoryBlob {
    fn id(&self) -> &BlobId {
        &self.0.blob_id
    }

    fn headers(&self) -> Result<Headers> {
        Ok(self.0.headers.clone())
    }

    fn input_stream(&self) -> Result<BlobStream> {
        Ok(Box::new(self.0.content.clone().reader()))
    }

    fn metrics(&self) -> Result<BlobMetrics> {
        let access = self.0.access.lock();
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA1.to_string(), compute_sha1(&self.0.content));
        Ok(BlobMetrics {
            creation_time: self.0.creation_time,
            last_access_time: access.last,
            hashes,
            header_size: self.0.header_size,
            content_size: self.0.content.len() as u64,
            access_count: Some(access.count),
        })
    }
}

/// Keeps every blob on the heap. Intended for tests and small caches.
pub struct InMemoryBlobStore {
    blobs: DashMap<BlobId, Arc<StoredBlob>>,
    ids: Arc<dyn BlobIdProvider>,
    listener: Option<Arc<dyn BlobStoreListener>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
            ids: Arc::new(UlidBlobIdProvider),
            listener: None,
        }
    }

    pub fn with_id_provider(mut self, ids: Arc<dyn BlobIdProvider>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn BlobStoreListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn remove(&self, blob_id: &BlobId) -> bool {
        let removed = self.blobs.remove(blob_id).is_some();
        if removed {
            tracing::debug!("Removed in-memory blob {}", blob_id);
            notify(self.listener.as_ref(), "deleted", |listener| {
                listener.blob_deleted(blob_id, "removed from memory")
            });
        }
        removed
    }
}

impl BlobStore for InMemoryBlobStore {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer)?;
        let header_size = JsonHeaderCodec.to_bytes(headers)?.len() as u64;

        let stored = Arc::new(StoredBlob {
            blob_id: self.ids.next_id(),
            headers: headers.clone(),
            content: Bytes::from(buffer),
            header_size,
            creation_time: Utc::now(),
            access: Mutex::new(AccessStats::default()),
        });
        self.blobs.insert(stored.blob_id.clone(), stored.clone());
        tracing::debug!(
            "Stored blob {} in memory ({} bytes)",
            stored.blob_id,
            stored.content.len()
        );

        let blob = InMemoryBlob(stored);
        notify(self.listener.as_ref(), "created", |listener| {
            listener.blob_created(&blob, "stored in memory")
        });
        Ok(Box::new(blob))
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        // Clone out of the map so no shard guard is held past this line.
        let Some(stored) = self.blobs.get(blob_id).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        {
            let mut access = stored.access.lock();
            access.count += 1;
            access.last = Some(Utc::now());
        }

        let blob = InMemoryBlob(stored);
        notify(self.listener.as_ref(), "accessed", |listener| {
            listener.blob_accessed(&blob)
        });
        Ok(Some(Box::new(blob)))
    }

    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        Ok(self.remove(blob_id))
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        Ok(self.remove(blob_id))
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        let mut metrics = BlobStoreMetrics::default();
        for entry in self.blobs.iter() {
            metrics.blob_count += 1;
            metrics.total_size += entry.content.len() as u64 + entry.header_size;
        }
        Ok(metrics)
    }

    /// Unlike `get`, this is not counted as an access.
    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        Ok(self.blobs.get(blob_id).map(|entry| entry.headers.clone()))
    }
}
