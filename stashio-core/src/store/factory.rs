use super::{
    BlobStore, BlobStoreListener, FileBlobStore, InMemoryBlobStore, LockingBlobStore,
    MirroredBlobStore,
};
use crate::error::{Result, StashError};
use crate::locking::{LockProvider, NoopLockProvider, PooledLockProvider};
use crate::spool::SpoolKind;
use crate::storage::{FlatLocationPolicy, HashedLocationPolicy, LocationPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Memory => "memory",
            StoreBackend::File => "file",
        })
    }
}

impl FromStr for StoreBackend {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "file" => Ok(StoreBackend::File),
            "" => Err(StashError::Config(
                "store backend cannot be empty".to_string(),
            )),
            other => Err(StashError::Config(format!(
                "unsupported store backend: {}",
                other
            ))),
        }
    }
}

/// On-disk placement of a file store's blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreLayout {
    Flat,
    #[default]
    Hashed,
}

impl StoreLayout {
    fn policy(self) -> Arc<dyn LocationPolicy> {
        match self {
            StoreLayout::Flat => Arc::new(FlatLocationPolicy),
            StoreLayout::Hashed => Arc::new(HashedLocationPolicy),
        }
    }
}

impl FromStr for StoreLayout {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(StoreLayout::Flat),
            "hashed" => Ok(StoreLayout::Hashed),
            other => Err(StashError::Config(format!(
                "unsupported store layout: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockingMode {
    None,
    #[default]
    Pooled,
}

impl FromStr for LockingMode {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LockingMode::None),
            "pooled" => Ok(LockingMode::Pooled),
            other => Err(StashError::Config(format!(
                "unsupported locking mode: {}",
                other
            ))),
        }
    }
}

/// Assembles a store stack from configuration.
///
/// A backend is required. The layout defaults to hashed and locking to
/// pooled. Setting a mirror store id wraps the primary in a
/// [`MirroredBlobStore`] over a second backend. With pooled locking, every
/// file store and the outer [`LockingBlobStore`] share one lock provider.
#[derive(Clone, Default)]
pub struct BlobStoreBuilder {
    backend: Option<StoreBackend>,
    data_dir: Option<PathBuf>,
    layout: StoreLayout,
    locking: LockingMode,
    mirror_store_id: Option<String>,
    mirror_backend: Option<StoreBackend>,
    mirror_data_dir: Option<PathBuf>,
    spool: SpoolKind,
    listener: Option<Arc<dyn BlobStoreListener>>,
}

impl BlobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: StoreBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn locking(mut self, locking: LockingMode) -> Self {
        self.locking = locking;
        self
    }

    pub fn mirror_store_id(mut self, store_id: impl Into<String>) -> Self {
        self.mirror_store_id = Some(store_id.into());
        self
    }

    /// Defaults to the primary's backend.
    pub fn mirror_backend(mut self, backend: StoreBackend) -> Self {
        self.mirror_backend = Some(backend);
        self
    }

    pub fn mirror_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.mirror_data_dir = Some(data_dir.into());
        self
    }

    pub fn spool(mut self, spool: SpoolKind) -> Self {
        self.spool = spool;
        self
    }

    /// Observes the primary backend.
    pub fn listener(mut self, listener: Arc<dyn BlobStoreListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn resolve_mirror_store_id(&self) -> Result<Option<String>> {
        let Some(store_id) = self.mirror_store_id.as_deref() else {
            return Ok(None);
        };
        let store_id = store_id.trim();
        if store_id.is_empty() {
            return Err(StashError::Config(
                "mirror store id cannot be empty".to_string(),
            ));
        }
        Ok(Some(store_id.to_string()))
    }

    fn build_backend(
        &self,
        backend: StoreBackend,
        data_dir: Option<&Path>,
        layout: &Arc<dyn LocationPolicy>,
        locks: &Arc<dyn LockProvider>,
        listener: Option<&Arc<dyn BlobStoreListener>>,
    ) -> Result<Box<dyn BlobStore>> {
        match backend {
            StoreBackend::Memory => {
                let mut store = InMemoryBlobStore::new();
                if let Some(listener) = listener {
                    store = store.with_listener(listener.clone());
                }
                Ok(Box::new(store))
            }
            StoreBackend::File => {
                let data_dir = data_dir.ok_or_else(|| {
                    StashError::Config("data_dir is required for the file backend".to_string())
                })?;
                let mut builder = FileBlobStore::builder(data_dir)
                    .location_policy(layout.clone())
                    .lock_provider(locks.clone());
                if let Some(listener) = listener {
                    builder = builder.listener(listener.clone());
                }
                Ok(Box::new(builder.build()?))
            }
        }
    }

    pub fn build(&self) -> Result<Box<dyn BlobStore>> {
        let backend = self
            .backend
            .ok_or_else(|| StashError::Config("store backend is required".to_string()))?;
        let layout = self.layout.policy();
        let mirror_store_id = self.resolve_mirror_store_id()?;
        let pooled: Option<Arc<dyn LockProvider>> = match self.locking {
            LockingMode::Pooled => Some(Arc::new(PooledLockProvider::new())),
            LockingMode::None => None,
        };
        let locks: Arc<dyn LockProvider> = match &pooled {
            Some(locks) => locks.clone(),
            None => Arc::new(NoopLockProvider),
        };

        let primary = self.build_backend(
            backend,
            self.data_dir.as_deref(),
            &layout,
            &locks,
            self.listener.as_ref(),
        )?;

        let store = match mirror_store_id {
            Some(store_id) => {
                let mirror_backend = self.mirror_backend.unwrap_or(backend);
                let mirror = self.build_backend(
                    mirror_backend,
                    self.mirror_data_dir.as_deref(),
                    &layout,
                    &locks,
                    None,
                )?;
                tracing::info!(
                    "Mirroring {} store into {} store as '{}'",
                    backend,
                    mirror_backend,
                    store_id
                );
                Box::new(MirroredBlobStore::new(store_id, primary, mirror).with_spool(self.spool))
                    as Box<dyn BlobStore>
            }
            None => primary,
        };

        Ok(match pooled {
            Some(locks) => Box::new(LockingBlobStore::new(store, locks)) as Box<dyn BlobStore>,
            None => store,
        })
    }
}
