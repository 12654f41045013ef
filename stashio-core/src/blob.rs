use crate::error::{Result, StashError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Caller-supplied metadata attached to a blob at creation.
pub type Headers = BTreeMap<String, String>;

/// Content stream handed out by [`Blob::input_stream`].
pub type BlobStream = Box<dyn Read + Send>;

/// Hash algorithm key used in [`BlobMetrics::hashes`].
pub const SHA1: &str = "SHA1";

/// Opaque, never-empty identifier of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(pub(crate) String);

impl BlobId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(StashError::InvalidRequest(
                "blob id cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BlobId {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = StashError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

/// A handle to a stored blob. Accessors read lazily from the backing store.
pub trait Blob: Send + Sync {
    fn id(&self) -> &BlobId;

    /// The headers that were provided when the blob was created.
    fn headers(&self) -> Result<Headers>;

    /// A fresh stream over the blob's bytes.
    fn input_stream(&self) -> Result<BlobStream>;

    fn metrics(&self) -> Result<BlobMetrics>;
}

impl fmt::Debug for dyn Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("id", self.id()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetrics {
    pub creation_time: DateTime<Utc>,
    pub last_access_time: Option<DateTime<Utc>>,
    /// Content digests keyed by algorithm name, e.g. [`SHA1`].
    pub hashes: BTreeMap<String, String>,
    pub header_size: u64,
    pub content_size: u64,
    /// `None` when the backend does not track accesses.
    pub access_count: Option<u64>,
}

impl BlobMetrics {
    pub fn total_size(&self) -> u64 {
        self.header_size + self.content_size
    }

    pub fn sha1(&self) -> Option<&str> {
        self.hashes.get(SHA1).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreMetrics {
    pub blob_count: u64,
    /// Content plus header bytes of every blob in the store.
    pub total_size: u64,
    /// Estimated free space; `None` when the store has no meaningful bound.
    pub available_space: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_rejects_empty() {
        assert!(matches!(
            BlobId::new(""),
            Err(StashError::InvalidRequest(_))
        ));
        assert_eq!(BlobId::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_blob_id_serde_is_plain_string() {
        let id: BlobId = "01HZX".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"01HZX\"");
        assert!(serde_json::from_str::<BlobId>("\"\"").is_err());
    }

    #[test]
    fn test_total_size() {
        let metrics = BlobMetrics {
            creation_time: Utc::now(),
            last_access_time: None,
            hashes: BTreeMap::new(),
            header_size: 17,
            content_size: 100,
            access_count: None,
        };
        assert_eq!(metrics.total_size(), 117);
        assert_eq!(metrics.sha1(), None);
    }
}
