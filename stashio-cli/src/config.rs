use serde::{Deserialize, Serialize};
use stashio_core::{
    BlobStoreBuilder, LockingMode, Result, SpoolKind, StashError, StoreBackend, StoreLayout,
};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
}

/// Store stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub layout: StoreLayout,
    #[serde(default)]
    pub locking: LockingMode,
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub store_id: String,
    /// Defaults to the primary's backend.
    #[serde(default)]
    pub backend: Option<StoreBackend>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub spool: SpoolKind,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("STASHIO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| StashError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StashError::Config(e.to_string()))?;

        Ok(config)
    }
}

impl StoreConfig {
    pub fn builder(&self) -> BlobStoreBuilder {
        let mut builder = BlobStoreBuilder::new()
            .backend(self.backend)
            .layout(self.layout)
            .locking(self.locking);
        if let Some(data_dir) = &self.data_dir {
            builder = builder.data_dir(data_dir);
        }

        if let Some(mirror) = &self.mirror {
            builder = builder
                .mirror_store_id(&mirror.store_id)
                .spool(mirror.spool);
            if let Some(backend) = mirror.backend {
                builder = builder.mirror_backend(backend);
            }
            if let Some(data_dir) = &mirror.data_dir {
                builder = builder.mirror_data_dir(data_dir);
            }
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("stashio.yaml");
        fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "store:\n  backend: memory\n");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.layout, StoreLayout::Hashed);
        assert_eq!(config.store.locking, LockingMode::Pooled);
        assert!(config.store.mirror.is_none());
        assert!(config.store.builder().build().is_ok());
    }

    #[test]
    fn test_mirrored_file_config() {
        let dir = TempDir::new().unwrap();
        let primary = dir.path().join("primary");
        let mirror = dir.path().join("mirror");
        let path = write_config(
            &dir,
            &format!(
                concat!(
                    "store:\n",
                    "  backend: file\n",
                    "  data_dir: {}\n",
                    "  layout: flat\n",
                    "  mirror:\n",
                    "    store_id: backup\n",
                    "    data_dir: {}\n",
                    "    spool: memory\n",
                ),
                primary.display(),
                mirror.display()
            ),
        );

        let config = Config::from_file(&path).unwrap();
        let store_config = &config.store;
        assert_eq!(store_config.layout, StoreLayout::Flat);
        let mirror_config = store_config.mirror.as_ref().unwrap();
        assert_eq!(mirror_config.store_id, "backup");
        assert_eq!(mirror_config.spool, SpoolKind::Memory);

        store_config.builder().build().unwrap();
        assert!(primary.is_dir());
        assert!(mirror.is_dir());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "store:\n  backend: tape\n");
        assert!(matches!(
            Config::from_file(&path),
            Err(StashError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(
            Config::from_file(&path.to_string_lossy()),
            Err(StashError::Config(_))
        ));
    }
}
