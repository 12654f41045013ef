use crate::blob::BlobStream;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Thin wrapper over the raw file primitives the file blob store needs, so the
/// store can be exercised against a fake filesystem.
pub trait FileOperations: Send + Sync {
    /// Creates a file (and its parent directories) populated from `data`.
    /// Fails if the file already exists. Returns the number of bytes written.
    fn create(&self, path: &Path, data: &mut dyn Read) -> Result<u64>;

    fn create_from_bytes(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut reader = data;
        self.create(path, &mut reader)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool;

    fn open_read(&self, path: &Path) -> Result<BlobStream>;

    fn creation_time(&self, path: &Path) -> Result<DateTime<Utc>>;

    fn last_access_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>>;

    /// Hex-encoded SHA-1 of the file's bytes.
    fn compute_sha1(&self, path: &Path) -> Result<String>;

    /// Returns true if the file existed before deletion.
    fn delete(&self, path: &Path) -> Result<bool>;

    fn file_size(&self, path: &Path) -> Result<u64>;
}

/// [`FileOperations`] over the local filesystem.
///
/// Files are written to a `.tmp` sibling, synced, then renamed into place, so
/// a reader never observes a half-written file under its final name.
#[derive(Debug, Default)]
pub struct SimpleFileOperations {
    dir_lock: Mutex<()>,
}

impl SimpleFileOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized so concurrent creators don't race on the same parent.
    fn ensure_directory_exists(&self, directory: &Path) -> Result<()> {
        let _guard = self.dir_lock.lock();
        if !directory.exists() {
            fs::create_dir_all(directory)?;
        }
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn write_temp(temp_path: &Path, data: &mut dyn Read) -> io::Result<u64> {
        let mut file = fs::File::create(temp_path)?;
        let written = io::copy(data, &mut file)?;
        file.flush()?;
        file.sync_all()?;
        Ok(written)
    }
}

impl FileOperations for SimpleFileOperations {
    fn create(&self, path: &Path, data: &mut dyn Read) -> Result<u64> {
        if let Some(parent) = path.parent() {
            self.ensure_directory_exists(parent)?;
        }

        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )
            .into());
        }

        let temp_path = Self::temp_path(path);
        let written = match Self::write_temp(&temp_path, data) {
            Ok(written) => written,
            Err(error) => {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    tracing::warn!(
                        "Failed to remove temp file {}: {}",
                        temp_path.display(),
                        cleanup
                    );
                }
                return Err(error.into());
            }
        };

        fs::rename(&temp_path, path)?;
        tracing::trace!("Wrote {} bytes to {}", written, path.display());
        Ok(written)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_read(&self, path: &Path) -> Result<BlobStream> {
        let file = fs::File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn creation_time(&self, path: &Path) -> Result<DateTime<Utc>> {
        let metadata = fs::metadata(path)?;
        // Not every filesystem records birth time.
        let created = metadata.created().or_else(|_| metadata.modified())?;
        Ok(DateTime::<Utc>::from(created))
    }

    fn last_access_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        let metadata = fs::metadata(path)?;
        Ok(metadata.accessed().ok().map(DateTime::<Utc>::from))
    }

    fn compute_sha1(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::trace!("Unable to delete; file not found: {}", path.display());
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}

/// Hex-encoded SHA-1 of an in-memory buffer.
pub fn compute_sha1(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}
