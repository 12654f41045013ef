//! Stashio Core - pluggable binary object storage
//!
//! A uniform blob store abstraction with interchangeable backends:
//! - in-memory store for tests and embedding
//! - file-backed store with flat or hashed directory layouts
//! - locking decorator adding per-blob read/exclusive locks
//! - mirrored decorator duplicating writes to a second store

pub mod blob;
pub mod error;
pub mod locking;
pub mod spool;
pub mod storage;
pub mod store;

pub use blob::{Blob, BlobId, BlobMetrics, BlobStoreMetrics, BlobStream, Headers, SHA1};
pub use error::{Result, StashError};
pub use locking::{
    BlobLock, LockHoldingReader, LockMode, LockProvider, NoopLockProvider, PooledLockProvider,
};
pub use spool::{MemorySpool, Spool, SpoolKind, StreamCopier, TempFileSpool};
pub use storage::{
    BlobIdProvider, FileOperations, FlatLocationPolicy, HashedLocationPolicy, HeaderCodec,
    JsonHeaderCodec, LocationPolicy, SimpleFileOperations, UlidBlobIdProvider, escape_blob_id,
};
pub use store::{
    BlobStore, BlobStoreBuilder, BlobStoreListener, FileBlobStore, FileBlobStoreBuilder,
    InMemoryBlobStore, LockingBlobStore, LockingMode, MIRROR_ID_KEY_PREFIX, MirroredBlobStore,
    StoreBackend, StoreLayout,
};
