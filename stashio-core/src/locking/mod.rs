//! Per-blob shared/exclusive locks
//!
//! A [`LockProvider`] hands out [`BlobLock`] handles keyed by blob id. Handles
//! release on drop; locks on distinct ids never contend.

pub mod pool;
pub mod reader;

pub use pool::PooledLockProvider;
pub use reader::LockHoldingReader;

use crate::blob::BlobId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Issues read and exclusive locks per blob id.
pub trait LockProvider: Send + Sync {
    /// Blocks until a shared lock is held. Shared locks on one id coexist.
    fn read_lock(&self, blob_id: &BlobId) -> BlobLock;

    /// Blocks until no other thread holds any lock on the id.
    fn exclusive_lock(&self, blob_id: &BlobId) -> BlobLock;

    /// Like [`LockProvider::exclusive_lock`] but returns `None` instead of
    /// blocking when the lock is unavailable.
    fn try_exclusive_lock(&self, blob_id: &BlobId) -> Option<BlobLock>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A held lock on one blob. Released exactly once: by [`BlobLock::release`]
/// or when dropped.
pub struct BlobLock {
    blob_id: BlobId,
    mode: LockMode,
    release: Option<Release>,
}

impl BlobLock {
    pub fn new(blob_id: BlobId, mode: LockMode, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            blob_id,
            mode,
            release: Some(Box::new(release)),
        }
    }

    pub fn blob_id(&self) -> &BlobId {
        &self.blob_id
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BlobLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for BlobLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobLock")
            .field("blob_id", &self.blob_id)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Hands out locks that guard nothing. For single-threaded or embedded use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLockProvider;

impl NoopLockProvider {
    fn noop_lock(blob_id: &BlobId, mode: LockMode) -> BlobLock {
        tracing::debug!("Obtaining no-op {:?} lock for blob {}", mode, blob_id);
        let id = blob_id.clone();
        BlobLock::new(blob_id.clone(), mode, move || {
            tracing::debug!("Closing no-op lock for blob {}", id);
        })
    }
}

impl LockProvider for NoopLockProvider {
    fn read_lock(&self, blob_id: &BlobId) -> BlobLock {
        Self::noop_lock(blob_id, LockMode::Shared)
    }

    fn exclusive_lock(&self, blob_id: &BlobId) -> BlobLock {
        Self::noop_lock(blob_id, LockMode::Exclusive)
    }

    fn try_exclusive_lock(&self, blob_id: &BlobId) -> Option<BlobLock> {
        Some(Self::noop_lock(blob_id, LockMode::Exclusive))
    }
}
