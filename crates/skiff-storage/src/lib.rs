//! Skiff storage library
//!
//! Storage abstraction and backend implementations for Skiff. The `Storage`
//! trait covers whole-object operations, ranged streaming reads, time-limited
//! retrieval URLs, prefix renames, and the multipart upload primitives used
//! by the chunked upload pipeline.
//!
//! # Storage key format
//!
//! Keys are owner-scoped: `files/{owner_id}/{filename}`. Keys must not
//! contain `..` or a leading `/`. Key and slug derivation is centralized in
//! the `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-object")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::StorageFactory;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-object")]
pub use s3::ObjectStorage;
pub use traits::{
    ByteRange, ByteStream, CompletedPart, PartTarget, Storage, StorageBackendKind, StorageError,
    StorageResult,
};
