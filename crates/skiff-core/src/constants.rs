//! Shared constants for the upload pipeline.

/// Fixed chunk size for chunked uploads (5 MiB, the S3 minimum part size).
pub const CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Files at or below this size are sent as a single direct upload.
pub const DIRECT_UPLOAD_THRESHOLD_BYTES: u64 = 8 * 1024 * 1024;

/// Upper bound on parts per session; callers must use a larger chunk size
/// beyond this.
pub const MAX_CHUNK_COUNT: i32 = 10_000;

/// Age after which an incomplete upload session is reaped.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Validity window for presigned part-upload and retrieval URLs.
pub const PRESIGNED_URL_TTL_SECS: u64 = 15 * 60;

/// Concurrent in-flight part uploads driven by the client orchestrator.
pub const PART_UPLOAD_CONCURRENCY: usize = 3;
