//! Blob store implementations
//!
//! [`BlobStore`] is the single capability every backend and decorator
//! implements. Decorators own their inner store and forward whatever they
//! don't modify, so they stack: `Locking(Mirrored(File, File))`.

pub mod factory;
pub mod file;
pub mod locking;
pub mod memory;
pub mod mirrored;

pub use factory::{BlobStoreBuilder, LockingMode, StoreBackend, StoreLayout};
pub use file::{FileBlobStore, FileBlobStoreBuilder};
pub use locking::LockingBlobStore;
pub use memory::InMemoryBlobStore;
pub use mirrored::{MIRROR_ID_KEY_PREFIX, MirroredBlobStore};

use crate::blob::{Blob, BlobId, BlobStoreMetrics, Headers};
use crate::error::Result;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A generic storage bin for binary objects of all sizes.
///
/// Blobs are write-once: created with their headers, read any number of
/// times, deleted once. Absence is reported as `Ok(None)` / `Ok(false)`;
/// errors mean the store could not answer.
pub trait BlobStore: Send + Sync {
    /// Consumes `content` to the end and stores it under a fresh id.
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>>;

    /// A lazy handle to the blob; content is not read until asked for.
    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>>;

    /// Returns whether a blob existed and was removed.
    fn delete(&self, blob_id: &BlobId) -> Result<bool>;

    /// Deletes without waiting on or honoring cooperative locks. For
    /// administrative cleanup.
    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool>;

    /// Aggregate figures; may walk the whole store.
    fn metrics(&self) -> Result<BlobStoreMetrics>;

    /// Reads a blob's headers without taking any lock, for hard deletes.
    /// Stores that lock on read override this.
    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        self.get(blob_id)?.map(|blob| blob.headers()).transpose()
    }
}

impl<S: BlobStore + ?Sized> BlobStore for Box<S> {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        (**self).create(content, headers)
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        (**self).get(blob_id)
    }

    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        (**self).delete(blob_id)
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        (**self).delete_hard(blob_id)
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        (**self).metrics()
    }

    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        (**self).headers_unlocked(blob_id)
    }
}

impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        (**self).create(content, headers)
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        (**self).get(blob_id)
    }

    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        (**self).delete(blob_id)
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        (**self).delete_hard(blob_id)
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        (**self).metrics()
    }

    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        (**self).headers_unlocked(blob_id)
    }
}

/// Observer of store activity. Every method defaults to doing nothing.
pub trait BlobStoreListener: Send + Sync {
    fn blob_created(&self, _blob: &dyn Blob, _message: &str) {}

    fn blob_accessed(&self, _blob: &dyn Blob) {}

    fn blob_deleted(&self, _blob_id: &BlobId, _message: &str) {}
}

/// Fire-and-forget: a panicking listener is logged and otherwise ignored.
pub(crate) fn notify(
    listener: Option<&Arc<dyn BlobStoreListener>>,
    event: &str,
    callback: impl FnOnce(&dyn BlobStoreListener),
) {
    let Some(listener) = listener else {
        return;
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(listener.as_ref())));
    if outcome.is_err() {
        tracing::warn!("Blob store listener panicked handling {} event", event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records listener events as strings, e.g. `created:<id>`.
    #[derive(Default)]
    pub struct RecordingListener {
        pub events: Mutex<Vec<String>>,
    }

    impl BlobStoreListener for RecordingListener {
        fn blob_created(&self, blob: &dyn Blob, _message: &str) {
            self.events.lock().push(format!("created:{}", blob.id()));
        }

        fn blob_accessed(&self, blob: &dyn Blob) {
            self.events.lock().push(format!("accessed:{}", blob.id()));
        }

        fn blob_deleted(&self, blob_id: &BlobId, _message: &str) {
            self.events.lock().push(format!("deleted:{}", blob_id));
        }
    }

    pub struct PanickingListener;

    impl BlobStoreListener for PanickingListener {
        fn blob_created(&self, _blob: &dyn Blob, _message: &str) {
            panic!("listener failure");
        }
    }

    pub fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn read_content(blob: &dyn Blob) -> Vec<u8> {
        let mut content = Vec::new();
        blob.input_stream()
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        content
    }
}
