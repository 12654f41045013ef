use super::BlobLock;
use std::io::{self, Read};

/// A reader that owns a [`BlobLock`] for as long as it lives. Dropping the
/// reader is how the lock is released.
pub struct LockHoldingReader<R> {
    inner: R,
    lock: BlobLock,
}

impl<R: Read> LockHoldingReader<R> {
    pub fn new(inner: R, lock: BlobLock) -> Self {
        Self { inner, lock }
    }
}

impl<R: Read> Read for LockHoldingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R> Drop for LockHoldingReader<R> {
    fn drop(&mut self) {
        tracing::trace!("Stream closed, releasing lock on blob {}", self.lock.blob_id());
    }
}
