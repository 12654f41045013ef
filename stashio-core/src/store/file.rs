use super::{BlobStore, BlobStoreListener, notify};
use crate::blob::{Blob, BlobId, BlobMetrics, BlobStoreMetrics, BlobStream, Headers, SHA1};
use crate::error::{Result, StashError};
use crate::locking::{LockHoldingReader, LockProvider, NoopLockProvider};
use crate::storage::location::{CONTENT_SUFFIX, HEADER_SUFFIX};
use crate::storage::{
    BlobIdProvider, FileOperations, HashedLocationPolicy, HeaderCodec, JsonHeaderCodec,
    LocationPolicy, SimpleFileOperations, UlidBlobIdProvider,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use sysinfo::Disks;
use walkdir::WalkDir;

struct FileStoreShared {
    data_dir: PathBuf,
    ids: Arc<dyn BlobIdProvider>,
    locations: Arc<dyn LocationPolicy>,
    files: Arc<dyn FileOperations>,
    header_codec: Arc<dyn HeaderCodec>,
    locks: Arc<dyn LockProvider>,
    listener: Option<Arc<dyn BlobStoreListener>>,
}

impl FileStoreShared {
    fn content_path(&self, blob_id: &BlobId) -> PathBuf {
        self.locations.content_path(&self.data_dir, blob_id)
    }

    fn header_path(&self, blob_id: &BlobId) -> PathBuf {
        self.locations.header_path(&self.data_dir, blob_id)
    }

    /// Callers hold whatever lock they need.
    fn read_headers(&self, blob_id: &BlobId, header_path: &Path) -> Result<Headers> {
        let mut input = self.files.open_read(header_path)?;
        self.header_codec
            .read(&mut input)
            .map_err(|error| StashError::CorruptHeaders {
                blob_id: blob_id.clone(),
                reason: error.to_string(),
            })
    }
}

/// Stores each blob as two files under a data directory: the content, and a
/// header file written after it. A blob exists only once its header file does.
///
/// Collaborators are pluggable through [`FileBlobStore::builder`]. The default
/// lock provider is a no-op; share a [`crate::PooledLockProvider`] with a
/// [`crate::LockingBlobStore`] when blobs are used from several threads.
pub struct FileBlobStore {
    shared: Arc<FileStoreShared>,
}

pub struct FileBlobStoreBuilder {
    data_dir: PathBuf,
    ids: Option<Arc<dyn BlobIdProvider>>,
    locations: Option<Arc<dyn LocationPolicy>>,
    files: Option<Arc<dyn FileOperations>>,
    header_codec: Option<Arc<dyn HeaderCodec>>,
    locks: Option<Arc<dyn LockProvider>>,
    listener: Option<Arc<dyn BlobStoreListener>>,
}

impl FileBlobStoreBuilder {
    pub fn id_provider(mut self, ids: Arc<dyn BlobIdProvider>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn location_policy(mut self, locations: Arc<dyn LocationPolicy>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn file_operations(mut self, files: Arc<dyn FileOperations>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn header_codec(mut self, header_codec: Arc<dyn HeaderCodec>) -> Self {
        self.header_codec = Some(header_codec);
        self
    }

    pub fn lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn BlobStoreListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Creates the data directory if needed.
    pub fn build(self) -> Result<FileBlobStore> {
        fs::create_dir_all(&self.data_dir)?;
        tracing::info!("Opened file blob store at {}", self.data_dir.display());

        Ok(FileBlobStore {
            shared: Arc::new(FileStoreShared {
                data_dir: self.data_dir,
                ids: self.ids.unwrap_or_else(|| Arc::new(UlidBlobIdProvider)),
                locations: self
                    .locations
                    .unwrap_or_else(|| Arc::new(HashedLocationPolicy)),
                files: self
                    .files
                    .unwrap_or_else(|| Arc::new(SimpleFileOperations::new())),
                header_codec: self.header_codec.unwrap_or_else(|| Arc::new(JsonHeaderCodec)),
                locks: self.locks.unwrap_or_else(|| Arc::new(NoopLockProvider)),
                listener: self.listener,
            }),
        })
    }
}

impl FileBlobStore {
    pub fn builder(data_dir: impl Into<PathBuf>) -> FileBlobStoreBuilder {
        FileBlobStoreBuilder {
            data_dir: data_dir.into(),
            ids: None,
            locations: None,
            files: None,
            header_codec: None,
            locks: None,
            listener: None,
        }
    }

    /// A store with every default collaborator.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(data_dir).build()
    }

    pub fn data_dir(&self) -> &Path {
        &self.shared.data_dir
    }

    fn delete_files(&self, blob_id: &BlobId) -> Result<bool> {
        let shared = &self.shared;
        let content_path = shared.content_path(blob_id);
        let header_path = shared.header_path(blob_id);

        let content_deleted = shared.files.delete(&content_path)?;
        let header_deleted = shared.files.delete(&header_path)?;
        if content_deleted != header_deleted {
            let missing = if content_deleted { &header_path } else { &content_path };
            tracing::error!(
                "Blob {} was incomplete; {} was already missing",
                blob_id,
                missing.display()
            );
        }

        let deleted = content_deleted || header_deleted;
        if deleted {
            tracing::debug!("Deleted blob {} from {}", blob_id, shared.data_dir.display());
            notify(shared.listener.as_ref(), "deleted", |listener| {
                listener.blob_deleted(blob_id, &format!("deleted {}", content_path.display()))
            });
        }
        Ok(deleted)
    }
}

impl BlobStore for FileBlobStore {
    fn create(&self, content: &mut dyn Read, headers: &Headers) -> Result<Box<dyn Blob>> {
        let shared = &self.shared;
        let blob_id = shared.ids.next_id();
        let header_bytes = shared.header_codec.to_bytes(headers)?;
        let content_path = shared.content_path(&blob_id);
        let header_path = shared.header_path(&blob_id);

        let _lock = shared.locks.exclusive_lock(&blob_id);
        let written = shared.files.create(&content_path, content)?;
        // The header file marks the blob as committed, so it goes last.
        if let Err(error) = shared.files.create_from_bytes(&header_path, &header_bytes) {
            tracing::error!(
                "Failed to write headers for blob {}, removing its content: {}",
                blob_id,
                error
            );
            if let Err(cleanup) = shared.files.delete(&content_path) {
                tracing::error!(
                    "Failed to remove orphaned content {}: {}",
                    content_path.display(),
                    cleanup
                );
            }
            return Err(error);
        }
        tracing::debug!(
            "Created blob {} ({} bytes) at {}",
            blob_id,
            written,
            content_path.display()
        );

        let blob = FileBlob::new(shared.clone(), blob_id);
        notify(shared.listener.as_ref(), "created", |listener| {
            listener.blob_created(&blob, &format!("written to {}", content_path.display()))
        });
        Ok(Box::new(blob))
    }

    fn get(&self, blob_id: &BlobId) -> Result<Option<Box<dyn Blob>>> {
        let shared = &self.shared;
        let _lock = shared.locks.read_lock(blob_id);
        let content_exists = shared.files.exists(&shared.content_path(blob_id));
        let header_exists = shared.files.exists(&shared.header_path(blob_id));

        match (content_exists, header_exists) {
            (true, true) => {}
            (false, false) => return Ok(None),
            (true, false) => {
                tracing::warn!(
                    "Blob {} has content but no header file; treating it as absent",
                    blob_id
                );
                return Ok(None);
            }
            (false, true) => {
                tracing::warn!(
                    "Blob {} has a header file but no content; treating it as absent",
                    blob_id
                );
                return Ok(None);
            }
        }

        let blob = FileBlob::new(shared.clone(), blob_id.clone());
        notify(shared.listener.as_ref(), "accessed", |listener| {
            listener.blob_accessed(&blob)
        });
        Ok(Some(Box::new(blob)))
    }

    fn delete(&self, blob_id: &BlobId) -> Result<bool> {
        let _lock = self.shared.locks.exclusive_lock(blob_id);
        self.delete_files(blob_id)
    }

    fn delete_hard(&self, blob_id: &BlobId) -> Result<bool> {
        self.delete_files(blob_id)
    }

    fn metrics(&self) -> Result<BlobStoreMetrics> {
        let data_dir = &self.shared.data_dir;
        let mut metrics = BlobStoreMetrics::default();

        // Files deleted mid-walk are skipped; they no longer count.
        for entry in WalkDir::new(data_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) if is_not_found(&error) => continue,
                Err(error) => return Err(StashError::Io(error.into())),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let extension = entry.path().extension().and_then(|e| e.to_str());
            let is_header = extension == Some(HEADER_SUFFIX);
            if !is_header && extension != Some(CONTENT_SUFFIX) {
                continue;
            }
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(error) if is_not_found(&error) => continue,
                Err(error) => return Err(StashError::Io(error.into())),
            };
            if is_header {
                metrics.blob_count += 1;
            }
            metrics.total_size += size;
        }

        metrics.available_space = available_space(data_dir);
        Ok(metrics)
    }

    fn headers_unlocked(&self, blob_id: &BlobId) -> Result<Option<Headers>> {
        let header_path = self.shared.header_path(blob_id);
        if !self.shared.files.exists(&header_path) {
            return Ok(None);
        }
        match self.shared.read_headers(blob_id, &header_path) {
            Ok(headers) => Ok(Some(headers)),
            Err(StashError::Io(error)) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }
}

fn is_not_found(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|error| error.kind() == io::ErrorKind::NotFound)
}

/// Free space on the disk holding `path`, by longest mount point prefix.
fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Lazy handle. Every accessor re-checks the files, so a handle to a deleted
/// blob fails with [`StashError::BlobDeleted`].
struct FileBlob {
    shared: Arc<FileStoreShared>,
    blob_id: BlobId,
    content_path: PathBuf,
    header_path: PathBuf,
    sha1: OnceLock<String>,
}

impl FileBlob {
    fn new(shared: Arc<FileStoreShared>, blob_id: BlobId) -> Self {
        let content_path = shared.content_path(&blob_id);
        let header_path = shared.header_path(&blob_id);
        Self {
            shared,
            blob_id,
            content_path,
            header_path,
            sha1: OnceLock::new(),
        }
    }

    fn ensure_exists(&self, path: &Path) -> Result<()> {
        if self.shared.files.exists(path) {
            Ok(())
        } else {
            Err(StashError::BlobDeleted(self.blob_id.clone()))
        }
    }

    fn sha1(&self) -> Result<String> {
        if let Some(digest) = self.sha1.get() {
            return Ok(digest.clone());
        }
        let digest = self.shared.files.compute_sha1(&self.content_path)?;
        Ok(self.sha1.get_or_init(|| digest).clone())
    }
}

impl Blob for FileBlob {
    fn id(&self) -> &BlobId {
        &self.blob_id
    }

    fn headers(&self) -> Result<Headers> {
        let _lock = self.shared.locks.read_lock(&self.blob_id);
        self.ensure_exists(&self.header_path)?;
        self.shared.read_headers(&self.blob_id, &self.header_path)
    }

    /// The returned stream holds a read lock on the blob until dropped.
    fn input_stream(&self) -> Result<BlobStream> {
        let lock = self.shared.locks.read_lock(&self.blob_id);
        self.ensure_exists(&self.content_path)?;
        let stream = self.shared.files.open_read(&self.content_path)?;
        Ok(Box::new(LockHoldingReader::new(stream, lock)))
    }

    fn metrics(&self) -> Result<BlobMetrics> {
        let _lock = self.shared.locks.read_lock(&self.blob_id);
        self.ensure_exists(&self.content_path)?;
        self.ensure_exists(&self.header_path)?;

        let files = &self.shared.files;
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA1.to_string(), self.sha1()?);
        Ok(BlobMetrics {
            creation_time: files.creation_time(&self.content_path)?,
            last_access_time: files.last_access_time(&self.content_path)?,
            hashes,
            header_size: files.file_size(&self.header_path)?,
            content_size: files.file_size(&self.content_path)?,
            access_count: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::PooledLockProvider;
    use crate::storage::FlatLocationPolicy;
    use crate::store::testing::{PanickingListener, RecordingListener, headers, read_content};
    use std::io;
    use tempfile::TempDir;

    fn flat_store(dir: &Path) -> FileBlobStore {
        FileBlobStore::builder(dir)
            .location_policy(Arc::new(FlatLocationPolicy))
            .build()
            .unwrap()
    }

    /// Fails every header write, to exercise create's cleanup path.
    struct FailingHeaderWrites(SimpleFileOperations);

    impl FileOperations for FailingHeaderWrites {
        fn create(&self, path: &Path, data: &mut dyn Read) -> Result<u64> {
            if path.extension().and_then(|e| e.to_str()) == Some(HEADER_SUFFIX) {
                return Err(io::Error::other("disk full").into());
            }
            self.0.create(path, data)
        }

        fn exists(&self, path: &Path) -> bool {
            self.0.exists(path)
        }

        fn open_read(&self, path: &Path) -> Result<BlobStream> {
            self.0.open_read(path)
        }

        fn creation_time(&self, path: &Path) -> Result<chrono::DateTime<chrono::Utc>> {
            self.0.creation_time(path)
        }

        fn last_access_time(&self, path: &Path) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
            self.0.last_access_time(path)
        }

        fn compute_sha1(&self, path: &Path) -> Result<String> {
            self.0.compute_sha1(path)
        }

        fn delete(&self, path: &Path) -> Result<bool> {
            self.0.delete(path)
        }

        fn file_size(&self, path: &Path) -> Result<u64> {
            self.0.file_size(path)
        }
    }

    #[test]
    fn test_create_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();

        let created = store
            .create(&mut &b"file content"[..], &headers(&[("name", "tinyblob")]))
            .unwrap();
        let id = created.id().clone();
        assert_eq!(read_content(created.as_ref()), b"file content");

        let fetched = store.get(&id).unwrap().expect("blob present");
        assert_eq!(fetched.headers().unwrap()["name"], "tinyblob");
        assert_eq!(read_content(fetched.as_ref()), b"file content");

        assert!(store.delete(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn test_default_layout_is_hashed() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let id = store
            .create(&mut &b"x"[..], &Headers::new())
            .unwrap()
            .id()
            .clone();

        let expected = HashedLocationPolicy.content_path(dir.path(), &id);
        assert!(expected.exists());
        assert!(
            expected
                .strip_prefix(dir.path())
                .unwrap()
                .to_string_lossy()
                .starts_with("vol-")
        );
    }

    #[test]
    fn test_header_file_is_flat_json() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(dir.path());
        let id = store
            .create(&mut &b"x"[..], &headers(&[("name", "tinyblob")]))
            .unwrap()
            .id()
            .clone();

        let header_file = FlatLocationPolicy.header_path(dir.path(), &id);
        let on_disk = fs::read_to_string(header_file).unwrap();
        assert_eq!(on_disk, r#"{"name":"tinyblob"}"#);
    }

    #[test]
    fn test_handle_to_deleted_blob_fails() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(dir.path());
        let blob = store.create(&mut &b"gone"[..], &Headers::new()).unwrap();
        store.delete(blob.id()).unwrap();

        assert!(matches!(blob.headers(), Err(StashError::BlobDeleted(_))));
        assert!(matches!(blob.input_stream(), Err(StashError::BlobDeleted(_))));
        assert!(matches!(blob.metrics(), Err(StashError::BlobDeleted(_))));
    }

    #[test]
    fn test_content_without_header_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(dir.path());
        let id = store
            .create(&mut &b"orphan"[..], &Headers::new())
            .unwrap()
            .id()
            .clone();
        fs::remove_file(FlatLocationPolicy.header_path(dir.path(), &id)).unwrap();

        assert!(store.get(&id).unwrap().is_none());
        // Delete still cleans up the orphaned content.
        assert!(store.delete(&id).unwrap());
        assert!(!FlatLocationPolicy.content_path(dir.path(), &id).exists());
    }

    #[test]
    fn test_failed_header_write_removes_content() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::builder(dir.path())
            .location_policy(Arc::new(FlatLocationPolicy))
            .file_operations(Arc::new(FailingHeaderWrites(SimpleFileOperations::new())))
            .build()
            .unwrap();

        assert!(store.create(&mut &b"lost"[..], &Headers::new()).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_header_file() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(dir.path());
        let blob = store.create(&mut &b"x"[..], &Headers::new()).unwrap();
        fs::write(FlatLocationPolicy.header_path(dir.path(), blob.id()), "{not json").unwrap();

        assert!(matches!(
            blob.headers(),
            Err(StashError::CorruptHeaders { .. })
        ));
    }

    #[test]
    fn test_blob_metrics() {
        let dir = TempDir::new().unwrap();
        let store = flat_store(dir.path());
        let blob = store
            .create(&mut &b"abc"[..], &headers(&[("k", "v")]))
            .unwrap();

        let metrics = blob.metrics().unwrap();
        assert_eq!(metrics.content_size, 3);
        assert_eq!(metrics.header_size, 9);
        assert_eq!(
            metrics.sha1(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(metrics.access_count, None);
        // Cached digest is reused.
        assert_eq!(blob.metrics().unwrap().sha1(), metrics.sha1());
    }

    #[test]
    fn test_store_metrics_walks_hashed_tree() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert_eq!(store.metrics().unwrap().blob_count, 0);

        for content in [&b"one"[..], &b"three"[..]] {
            store.create(&mut &content[..], &Headers::new()).unwrap();
        }

        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.blob_count, 2);
        assert_eq!(metrics.total_size, 3 + 5 + 2 + 2);
    }

    #[test]
    fn test_store_metrics_during_concurrent_deletes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(flat_store(dir.path()));
        let ids: Vec<BlobId> = (0..500)
            .map(|_| {
                store
                    .create(&mut &b"short lived"[..], &Headers::new())
                    .unwrap()
                    .id()
                    .clone()
            })
            .collect();

        let deleter = store.clone();
        let handle = std::thread::spawn(move || {
            for id in &ids {
                assert!(deleter.delete(id).unwrap());
            }
        });
        while !handle.is_finished() {
            let metrics = store.metrics().unwrap();
            assert!(metrics.blob_count <= 500);
        }
        handle.join().unwrap();

        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.blob_count, 0);
        assert_eq!(metrics.total_size, 0);
    }

    #[test]
    fn test_headers_unlocked_ignores_held_lock() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(PooledLockProvider::new());
        let store = Arc::new(
            FileBlobStore::builder(dir.path())
                .lock_provider(locks.clone())
                .build()
                .unwrap(),
        );
        let id = store
            .create(&mut &b"x"[..], &headers(&[("name", "held")]))
            .unwrap()
            .id()
            .clone();
        let missing = BlobId::new("never-created").unwrap();

        let _held = locks.exclusive_lock(&id);
        let reader = store.clone();
        let (found, absent) = std::thread::spawn(move || {
            (
                reader.headers_unlocked(&id).unwrap(),
                reader.headers_unlocked(&missing).unwrap(),
            )
        })
        .join()
        .unwrap();
        assert_eq!(found, Some(headers(&[("name", "held")])));
        assert_eq!(absent, None);
    }

    #[test]
    fn test_stream_holds_read_lock() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(PooledLockProvider::new());
        let store = FileBlobStore::builder(dir.path())
            .lock_provider(locks.clone())
            .build()
            .unwrap();

        let blob = store.create(&mut &b"locked"[..], &Headers::new()).unwrap();
        assert_eq!(locks.outstanding_locks(), 0);

        let stream = blob.input_stream().unwrap();
        assert_eq!(locks.outstanding_locks(), 1);
        drop(stream);
        assert_eq!(locks.outstanding_locks(), 0);
    }

    #[test]
    fn test_listener_events() {
        let dir = TempDir::new().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let store = FileBlobStore::builder(dir.path())
            .listener(listener.clone())
            .build()
            .unwrap();

        let id = store
            .create(&mut &b"x"[..], &Headers::new())
            .unwrap()
            .id()
            .clone();
        store.get(&id).unwrap();
        store.delete_hard(&id).unwrap();
        store.delete_hard(&id).unwrap();

        assert_eq!(
            *listener.events.lock(),
            vec![
                format!("created:{}", id),
                format!("accessed:{}", id),
                format!("deleted:{}", id),
            ]
        );
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::builder(dir.path())
            .listener(Arc::new(PanickingListener))
            .build()
            .unwrap();
        let blob = store.create(&mut &b"ok"[..], &Headers::new()).unwrap();
        assert!(store.get(blob.id()).unwrap().is_some());
    }
}
