use crate::blob::BlobId;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const CONTENT_SUFFIX: &str = "blob";
pub const HEADER_SUFFIX: &str = "header";

/// Maps a blob id to the content and header file paths under a data directory.
pub trait LocationPolicy: Send + Sync {
    fn content_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf;

    fn header_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf;
}

/// Replaces directory navigation characters so an id is always a single,
/// plain file name.
pub fn escape_blob_id(blob_id: &BlobId) -> String {
    blob_id
        .as_str()
        .chars()
        .map(|c| match c {
            '.' | '\\' | '/' => '-',
            other => other,
        })
        .collect()
}

fn file_name(blob_id: &BlobId, suffix: &str) -> String {
    format!("{}.{}", escape_blob_id(blob_id), suffix)
}

/// Stores every file directly in the data directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatLocationPolicy;

impl LocationPolicy for FlatLocationPolicy {
    fn content_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf {
        data_dir.join(file_name(blob_id, CONTENT_SUFFIX))
    }

    fn header_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf {
        data_dir.join(file_name(blob_id, HEADER_SUFFIX))
    }
}

/// Spreads files over a two-deep tree, `vol-NN/chap-MM`, with
/// [`HashedLocationPolicy::TIER_1_MODULO`] volumes and
/// [`HashedLocationPolicy::TIER_2_MODULO`] chapters per volume.
///
/// Both tiers are derived from the same stable 32-bit hash of the id. Because
/// the moduli are coprime, every (volume, chapter) pair is reachable and the
/// 2021 leaf directories fill evenly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedLocationPolicy;

impl HashedLocationPolicy {
    pub const TIER_1_MODULO: u32 = 43;
    pub const TIER_2_MODULO: u32 = 47;

    pub fn subdirectory(blob_id: &BlobId) -> PathBuf {
        let hash = bucket_hash(blob_id);
        PathBuf::from(format!("vol-{:02}", hash % Self::TIER_1_MODULO + 1))
            .join(format!("chap-{:02}", hash % Self::TIER_2_MODULO + 1))
    }
}

impl LocationPolicy for HashedLocationPolicy {
    fn content_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf {
        data_dir
            .join(Self::subdirectory(blob_id))
            .join(file_name(blob_id, CONTENT_SUFFIX))
    }

    fn header_path(&self, data_dir: &Path, blob_id: &BlobId) -> PathBuf {
        data_dir
            .join(Self::subdirectory(blob_id))
            .join(file_name(blob_id, HEADER_SUFFIX))
    }
}

/// Must stay stable across processes and releases: it decides where existing
/// files live on disk.
fn bucket_hash(blob_id: &BlobId) -> u32 {
    let digest = Sha256::digest(blob_id.as_str().as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
