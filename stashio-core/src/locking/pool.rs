use super::{BlobLock, LockMode, LockProvider};
use crate::blob::BlobId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

/// A reentrant reader/writer lock.
///
/// The thread holding the write lock may take it again, and may also take read
/// locks. A thread already holding a read lock may take more read locks even
/// while a writer waits. Holds are attributed to the acquiring thread, so a
/// handle may be released from any thread.
#[derive(Default)]
struct ReentrantRwLock {
    state: Mutex<RwState>,
    changed: Condvar,
}

#[derive(Default)]
struct RwState {
    readers: HashMap<ThreadId, usize>,
    writer: Option<ThreadId>,
    write_holds: usize,
    waiting_writers: usize,
}

impl RwState {
    fn can_read(&self, me: ThreadId) -> bool {
        match self.writer {
            Some(owner) => owner == me,
            None => self.waiting_writers == 0 || self.readers.contains_key(&me),
        }
    }

    fn can_write(&self, me: ThreadId) -> bool {
        match self.writer {
            Some(owner) => owner == me,
            None => self.readers.is_empty(),
        }
    }

    fn take_write(&mut self, me: ThreadId) {
        self.writer = Some(me);
        self.write_holds += 1;
    }
}

impl ReentrantRwLock {
    fn read(&self, me: ThreadId) {
        let mut state = self.state.lock();
        while !state.can_read(me) {
            self.changed.wait(&mut state);
        }
        *state.readers.entry(me).or_default() += 1;
    }

    fn write(&self, me: ThreadId) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while !state.can_write(me) {
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.take_write(me);
    }

    fn try_write(&self, me: ThreadId) -> bool {
        let mut state = self.state.lock();
        if !state.can_write(me) {
            return false;
        }
        state.take_write(me);
        true
    }

    fn unlock(&self, mode: LockMode, owner: ThreadId) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Shared => {
                if let Some(count) = state.readers.get_mut(&owner) {
                    *count -= 1;
                    if *count == 0 {
                        state.readers.remove(&owner);
                    }
                }
            }
            LockMode::Exclusive => {
                state.write_holds = state.write_holds.saturating_sub(1);
                if state.write_holds == 0 {
                    state.writer = None;
                }
            }
        }
        drop(state);
        self.changed.notify_all();
    }
}

struct PoolEntry {
    lock: Arc<ReentrantRwLock>,
    refs: usize,
}

/// Lock objects keyed by blob id, created on first use and retired once no
/// handle references them. Guarded by its own mutex, never held while waiting
/// on a blob lock.
#[derive(Default)]
struct LockPool {
    entries: Mutex<HashMap<BlobId, PoolEntry>>,
    outstanding: AtomicUsize,
}

impl LockPool {
    fn checkout(&self, blob_id: &BlobId) -> Arc<ReentrantRwLock> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(blob_id.clone()).or_insert_with(|| PoolEntry {
            lock: Arc::new(ReentrantRwLock::default()),
            refs: 0,
        });
        entry.refs += 1;
        entry.lock.clone()
    }

    fn checkin(&self, blob_id: &BlobId) {
        let mut entries = self.entries.lock();
        let retire = match entries.get_mut(blob_id) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            None => {
                tracing::warn!("Lock pool has no entry for blob {}", blob_id);
                false
            }
        };
        if retire {
            entries.remove(blob_id);
        }
    }
}

/// [`LockProvider`] backed by a reference-counted pool of reentrant
/// reader/writer locks, one per blob id in use.
#[derive(Default)]
pub struct PooledLockProvider {
    pool: Arc<LockPool>,
}

impl PooledLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handles issued and not yet released.
    pub fn outstanding_locks(&self) -> usize {
        self.pool.outstanding.load(Ordering::SeqCst)
    }

    /// Number of blob ids with a live lock object.
    pub fn pooled_ids(&self) -> usize {
        self.pool.entries.lock().len()
    }

    fn issue(
        &self,
        blob_id: &BlobId,
        mode: LockMode,
        lock: Arc<ReentrantRwLock>,
        owner: ThreadId,
    ) -> BlobLock {
        self.pool.outstanding.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("Acquired {:?} lock on blob {}", mode, blob_id);

        let pool = self.pool.clone();
        let id = blob_id.clone();
        BlobLock::new(blob_id.clone(), mode, move || {
            // Unlock before checkin so the entry can't be retired while held.
            lock.unlock(mode, owner);
            pool.checkin(&id);
            pool.outstanding.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("Released {:?} lock on blob {}", mode, id);
        })
    }
}

impl LockProvider for PooledLockProvider {
    fn read_lock(&self, blob_id: &BlobId) -> BlobLock {
        let me = thread::current().id();
        let lock = self.pool.checkout(blob_id);
        lock.read(me);
        self.issue(blob_id, LockMode::Shared, lock, me)
    }

    fn exclusive_lock(&self, blob_id: &BlobId) -> BlobLock {
        let me = thread::current().id();
        let lock = self.pool.checkout(blob_id);
        lock.write(me);
        self.issue(blob_id, LockMode::Exclusive, lock, me)
    }

    fn try_exclusive_lock(&self, blob_id: &BlobId) -> Option<BlobLock> {
        let me = thread::current().id();
        let lock = self.pool.checkout(blob_id);
        if !lock.try_write(me) {
            self.pool.checkin(blob_id);
            return None;
        }
        Some(self.issue(blob_id, LockMode::Exclusive, lock, me))
    }
}

impl Drop for PooledLockProvider {
    fn drop(&mut self) {
        let outstanding = self.outstanding_locks();
        if outstanding > 0 {
            tracing::warn!(
                "Blob lock leakage detected: {} lock(s) still held when the provider was dropped",
                outstanding
            );
        }
    }
}
