use super::Spool;
use crate::blob::BlobStream;
use crate::error::{Result, StashError};
use std::io::{self, Read, Write};

/// Splits one input into two streams without reading the source twice.
///
/// The copier is itself the original stream: every byte read from it is also
/// written to the spool. Once the original has been read to the end,
/// [`StreamCopier::into_copied_stream`] consumes the copier and returns the
/// copy. Asking for the copy any earlier is an error.
pub struct StreamCopier<R> {
    source: R,
    spool: Box<dyn Spool>,
    exhausted: bool,
    copied: u64,
}

impl<R: Read> StreamCopier<R> {
    pub fn new(source: R, spool: Box<dyn Spool>) -> Self {
        Self {
            source,
            spool,
            exhausted: false,
            copied: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn bytes_copied(&self) -> u64 {
        self.copied
    }

    pub fn into_copied_stream(self) -> Result<BlobStream> {
        if !self.exhausted {
            return Err(StashError::InvalidState(
                "the original stream must be read to the end before requesting the copy"
                    .to_string(),
            ));
        }
        self.spool.into_reader()
    }
}

impl<R: Read> Read for StreamCopier<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.exhausted {
            return Ok(0);
        }

        let read = self.source.read(buf)?;
        if read == 0 {
            self.spool.flush()?;
            self.exhausted = true;
        } else {
            self.spool.write_all(&buf[..read])?;
            self.copied += read as u64;
        }
        Ok(read)
    }
}
