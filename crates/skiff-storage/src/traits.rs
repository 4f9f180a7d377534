//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must
//! implement, including the multipart primitives behind the chunked upload
//! pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Range not satisfiable for object of {size} bytes")]
    RangeUnsatisfiable { size: u64 },

    #[error("Unknown multipart upload: {0}")]
    UploadNotFound(String),

    #[error("Part list mismatch: {0}")]
    PartMismatch(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Streaming object body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Validates the range against an object size.
    pub fn check_within(&self, size: u64) -> StorageResult<()> {
        if self.is_empty() || self.end >= size {
            return Err(StorageError::RangeUnsatisfiable { size });
        }
        Ok(())
    }
}

/// Backend kind, for logging and diagnostics only. Callers branch on
/// capability methods, never on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    Local,
    ObjectStorage,
}

impl std::fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendKind::Local => write!(f, "local"),
            StorageBackendKind::ObjectStorage => write!(f, "object"),
        }
    }
}

/// Where bytes for one part should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartTarget {
    /// The caller uploads through the application (acknowledge_part).
    Direct,
    /// The caller may upload straight to the backing store.
    Presigned { url: String, expires_in: Duration },
}

/// One finished part, as supplied to `complete_multipart`. The list must be
/// ordered by part number with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Opaque identifier returned by `acknowledge_part`
    pub part_id: String,
}

/// Verifies a completion part list is exactly parts 1..=n in order.
///
/// Shared by backends so both reject gaps, duplicates, and reordering the
/// same way.
pub(crate) fn check_contiguous(parts: &[CompletedPart]) -> StorageResult<()> {
    if parts.is_empty() {
        return Err(StorageError::PartMismatch("empty part list".to_string()));
    }
    for (idx, part) in parts.iter().enumerate() {
        let expected = idx as i32 + 1;
        if part.part_number != expected {
            return Err(StorageError::PartMismatch(format!(
                "expected part {} at position {}, got part {}",
                expected, idx, part.part_number
            )));
        }
    }
    Ok(())
}

/// Storage abstraction trait
///
/// All storage backends (object storage, local filesystem) must implement
/// this trait. The upload pipeline and download handlers work against it
/// without coupling to a concrete backend.
///
/// **Key format:** keys are owner-scoped `files/{owner_id}/{filename}`. See
/// the crate root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` at `key`, overwriting any existing object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Delete the object at `key`. Deleting a missing key is a success.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Open a readable byte stream over the object.
    ///
    /// With a `range`, the stream yields exactly `range.len()` bytes starting
    /// at `range.start`. Fails with `NotFound` when the key is absent and
    /// `RangeUnsatisfiable` when the range falls outside the object.
    async fn open_stream(&self, key: &str, range: Option<ByteRange>) -> StorageResult<ByteStream>;

    /// Byte length of the object. Fails with `NotFound` when absent.
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// A URL valid for `ttl` that serves the object without further
    /// authorization. Only meaningful for offload when
    /// `supports_presigned_transfer()` is true.
    async fn retrieval_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Move every key under `old_prefix` to `new_prefix`. Returns the number
    /// of objects moved.
    async fn rename_prefix(&self, old_prefix: &str, new_prefix: &str) -> StorageResult<u64>;

    /// Start a multipart upload for `key`; returns an upload id scoped to
    /// this backend.
    async fn begin_multipart(&self, key: &str, content_type: &str) -> StorageResult<String>;

    /// Where bytes for `part_number` should be sent. Presigned targets carry
    /// a TTL and can be re-requested after expiry.
    async fn part_target(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> StorageResult<PartTarget>;

    /// Accept bytes for one part (1-based `part_number`) and return the
    /// opaque part identifier required for completion. Re-sending the same
    /// part number replaces the previous bytes.
    async fn acknowledge_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Combine the uploaded parts into the final object. `parts` must list
    /// every part in part-number order; gaps or identifier mismatches fail
    /// without producing an object, leaving the upload open for retry.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Release staging resources for an upload. Aborting an unknown upload is
    /// a success.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Whether this backend can hand out URLs that move bytes directly
    /// between the client and the store (presigned transfer).
    fn supports_presigned_transfer(&self) -> bool;

    /// Backend kind for logging/diagnostics.
    fn kind(&self) -> StorageBackendKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_len_is_inclusive() {
        let range = ByteRange::new(0, 0);
        assert_eq!(range.len(), 1);
        let range = ByteRange::new(100, 199);
        assert_eq!(range.len(), 100);
    }

    #[test]
    fn byte_range_check_within() {
        assert!(ByteRange::new(0, 9).check_within(10).is_ok());
        assert!(matches!(
            ByteRange::new(0, 10).check_within(10),
            Err(StorageError::RangeUnsatisfiable { size: 10 })
        ));
        assert!(ByteRange::new(5, 4).check_within(10).is_err());
    }

    #[test]
    fn contiguous_part_list_accepted() {
        let parts = vec![
            CompletedPart {
                part_number: 1,
                part_id: "a".to_string(),
            },
            CompletedPart {
                part_number: 2,
                part_id: "b".to_string(),
            },
        ];
        assert!(check_contiguous(&parts).is_ok());
    }

    #[test]
    fn gapped_or_unordered_part_list_rejected() {
        let gapped = vec![
            CompletedPart {
                part_number: 1,
                part_id: "a".to_string(),
            },
            CompletedPart {
                part_number: 3,
                part_id: "c".to_string(),
            },
        ];
        assert!(check_contiguous(&gapped).is_err());

        let unordered = vec![
            CompletedPart {
                part_number: 2,
                part_id: "b".to_string(),
            },
            CompletedPart {
                part_number: 1,
                part_id: "a".to_string(),
            },
        ];
        assert!(check_contiguous(&unordered).is_err());

        assert!(check_contiguous(&[]).is_err());
    }
}
