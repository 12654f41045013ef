//! Storage primitives for Stashio
//!
//! Identifier generation, raw file operations, on-disk placement and the
//! header file format used by the file-backed blob store.

pub mod file_ops;
pub mod header_codec;
pub mod id_provider;
pub mod location;

pub use file_ops::{FileOperations, SimpleFileOperations};
pub use header_codec::{HeaderCodec, JsonHeaderCodec};
pub use id_provider::{BlobIdProvider, UlidBlobIdProvider};
pub use location::{FlatLocationPolicy, HashedLocationPolicy, LocationPolicy, escape_blob_id};
