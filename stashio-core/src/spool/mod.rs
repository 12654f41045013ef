//! Spools let one input stream be read twice
//!
//! A spool is written once, then sealed into a reader over the same bytes.
//! [`StreamCopier`] tees a source into a spool while the source is consumed.

pub mod copier;

pub use copier::StreamCopier;

use crate::blob::BlobStream;
use crate::error::{Result, StashError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;
use tempfile::{NamedTempFile, TempPath};

const TEMP_FILE_BUFFER_SIZE: usize = 1024 * 1024;

/// Write-once buffer. Writing is the first phase; [`Spool::into_reader`]
/// seals it and starts the read phase.
pub trait Spool: Write + Send {
    fn into_reader(self: Box<Self>) -> Result<BlobStream>;
}

/// Heap-backed spool, best for blobs of a few megabytes at most.
#[derive(Debug, Default)]
pub struct MemorySpool {
    buffer: Vec<u8>,
}

impl MemorySpool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for MemorySpool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Spool for MemorySpool {
    fn into_reader(self: Box<Self>) -> Result<BlobStream> {
        Ok(Box::new(io::Cursor::new(self.buffer)))
    }
}

/// Disk-backed spool for large blobs. The temp file is removed when the
/// reader it is sealed into is dropped, or with the spool if never sealed.
pub struct TempFileSpool {
    writer: BufWriter<NamedTempFile>,
}

impl TempFileSpool {
    pub fn new() -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("stream")
            .suffix(".spool")
            .tempfile()?;
        tracing::debug!("Spooling content to {}", file.path().display());
        Ok(Self {
            writer: BufWriter::with_capacity(TEMP_FILE_BUFFER_SIZE, file),
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.get_ref().path()
    }
}

impl Write for TempFileSpool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Spool for TempFileSpool {
    fn into_reader(self: Box<Self>) -> Result<BlobStream> {
        let temp_file = self.writer.into_inner().map_err(|e| e.into_error())?;
        let (mut file, path) = temp_file.into_parts();
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(DeleteOnCloseReader {
            inner: Some(BufReader::with_capacity(TEMP_FILE_BUFFER_SIZE, file)),
            path: Some(path),
        }))
    }
}

struct DeleteOnCloseReader {
    inner: Option<BufReader<File>>,
    path: Option<TempPath>,
}

impl Read for DeleteOnCloseReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for DeleteOnCloseReader {
    fn drop(&mut self) {
        // Close the handle before unlinking.
        self.inner.take();
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            tracing::debug!("Deleting spool file {}", shown);
            if let Err(error) = path.close() {
                tracing::warn!("Failed to delete spool file {}: {}", shown, error);
            }
        }
    }
}

/// Which spool a mirrored store tees through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpoolKind {
    Memory,
    #[default]
    TempFile,
}

impl SpoolKind {
    pub fn create(&self) -> Result<Box<dyn Spool>> {
        match self {
            SpoolKind::Memory => Ok(Box::new(MemorySpool::new())),
            SpoolKind::TempFile => Ok(Box::new(TempFileSpool::new()?)),
        }
    }
}

impl FromStr for SpoolKind {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(SpoolKind::Memory),
            "temp-file" | "tempfile" | "file" => Ok(SpoolKind::TempFile),
            other => Err(StashError::Config(format!(
                "unsupported spool kind '{}': expected memory | temp-file",
                other
            ))),
        }
    }
}
