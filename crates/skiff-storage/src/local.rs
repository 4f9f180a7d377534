use crate::traits::{
    check_contiguous, ByteRange, ByteStream, CompletedPart, PartTarget, Storage,
    StorageBackendKind, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Directory under the storage root that holds in-flight multipart staging.
const MULTIPART_DIR: &str = ".multipart";

/// Recorded state for one emulated multipart upload.
struct MultipartState {
    key: String,
    /// part number -> (part identifier, byte length)
    parts: HashMap<i32, (String, u64)>,
}

/// Local filesystem storage implementation.
///
/// Multipart uploads are emulated: parts land as numbered staging files under
/// `.multipart/{upload_id}/` and completion concatenates them in part order
/// into the final key. Part targets are always `Direct`.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    uploads: Arc<Mutex<HashMap<String, MultipartState>>>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/skiff/files")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:4000/media")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Convert storage key to filesystem path with security validation.
    ///
    /// Rejects storage keys containing path traversal sequences that could
    /// escape the base storage directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains("..")
            || storage_key.starts_with('/')
            || storage_key.contains('\\')
        {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        Ok(self.base_path.join(storage_key))
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Staging directory for one multipart upload. Derivable from the upload
    /// id alone so aborts work even when the in-memory registry is gone.
    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: i32) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("part-{:05}", part_number))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), key = %key, "Local storage delete successful");

        Ok(())
    }

    async fn open_stream(&self, key: &str, range: Option<ByteRange>) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let mut file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match range {
            Some(range) => {
                let meta = file.metadata().await?;
                range.check_within(meta.len())?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                Box::new(file.take(range.len()))
            }
            None => Box::new(file),
        };

        let stream = tokio_util::io::ReaderStream::new(reader).map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::BackendError(e.to_string())
            }
        })?;
        Ok(meta.len())
    }

    async fn retrieval_url(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        self.key_to_path(key)?;
        // No signing facility on the local filesystem; callers check
        // supports_presigned_transfer() before offloading downloads.
        Ok(self.generate_url(key))
    }

    async fn rename_prefix(&self, old_prefix: &str, new_prefix: &str) -> StorageResult<u64> {
        let old_dir = self.key_to_path(old_prefix)?;
        let new_dir = self.key_to_path(new_prefix)?;

        if !fs::try_exists(&old_dir).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut count = 0u64;
        let mut entries = fs::read_dir(&old_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }

        self.ensure_parent_dir(&new_dir).await?;
        fs::rename(&old_dir, &new_dir).await.map_err(|e| {
            StorageError::BackendError(format!(
                "Failed to rename {} to {}: {}",
                old_dir.display(),
                new_dir.display(),
                e
            ))
        })?;

        tracing::info!(
            old_prefix = %old_prefix,
            new_prefix = %new_prefix,
            moved = count,
            "Local storage prefix rename successful"
        );

        Ok(count)
    }

    async fn begin_multipart(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        // Validate the final key up front so a bad key fails at initiation,
        // not at completion.
        self.key_to_path(key)?;

        let upload_id = Uuid::new_v4().to_string();
        let staging = self.staging_dir(&upload_id);
        fs::create_dir_all(&staging).await?;

        let mut uploads = self.uploads.lock().await;
        uploads.insert(
            upload_id.clone(),
            MultipartState {
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );

        tracing::info!(key = %key, upload_id = %upload_id, "Local multipart upload started");

        Ok(upload_id)
    }

    async fn part_target(
        &self,
        _key: &str,
        upload_id: &str,
        _part_number: i32,
        _ttl: Duration,
    ) -> StorageResult<PartTarget> {
        let uploads = self.uploads.lock().await;
        if !uploads.contains_key(upload_id) {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        Ok(PartTarget::Direct)
    }

    async fn acknowledge_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<String> {
        if part_number < 1 {
            return Err(StorageError::PartMismatch(format!(
                "part number must be >= 1, got {}",
                part_number
            )));
        }

        {
            let uploads = self.uploads.lock().await;
            if !uploads.contains_key(upload_id) {
                return Err(StorageError::UploadNotFound(upload_id.to_string()));
            }
        }

        let path = self.part_path(upload_id, part_number);
        let size = data.len() as u64;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create part file {}: {}",
                path.display(),
                e
            ))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to write part file {}: {}",
                path.display(),
                e
            ))
        })?;
        file.sync_all().await?;

        let part_id = hex::encode(Sha256::digest(&data));

        let mut uploads = self.uploads.lock().await;
        let state = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;
        // Re-uploading the same part number replaces the recorded identifier.
        state.parts.insert(part_number, (part_id.clone(), size));

        tracing::info!(
            upload_id = %upload_id,
            part_number = part_number,
            size_bytes = size,
            "Local multipart part staged"
        );

        Ok(part_id)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        check_contiguous(parts)?;

        // Validate against recorded state without removing it, so a failed
        // completion leaves the upload retryable.
        {
            let uploads = self.uploads.lock().await;
            let state = uploads
                .get(upload_id)
                .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;

            if state.key != key {
                return Err(StorageError::PartMismatch(format!(
                    "upload {} belongs to key {}, not {}",
                    upload_id, state.key, key
                )));
            }
            if state.parts.len() != parts.len() {
                return Err(StorageError::PartMismatch(format!(
                    "{} parts supplied, {} parts staged",
                    parts.len(),
                    state.parts.len()
                )));
            }
            for part in parts {
                match state.parts.get(&part.part_number) {
                    Some((recorded_id, _)) if *recorded_id == part.part_id => {}
                    Some(_) => {
                        return Err(StorageError::PartMismatch(format!(
                            "identifier mismatch for part {}",
                            part.part_number
                        )))
                    }
                    None => {
                        return Err(StorageError::PartMismatch(format!(
                            "part {} was never uploaded",
                            part.part_number
                        )))
                    }
                }
            }
        }

        let final_path = self.key_to_path(key)?;
        self.ensure_parent_dir(&final_path).await?;

        let start = std::time::Instant::now();
        let mut dest = fs::File::create(&final_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                final_path.display(),
                e
            ))
        })?;

        let mut total = 0u64;
        for part in parts {
            let part_path = self.part_path(upload_id, part.part_number);
            let mut src = fs::File::open(&part_path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to open part file {}: {}",
                    part_path.display(),
                    e
                ))
            })?;
            total += tokio::io::copy(&mut src, &mut dest).await?;
        }

        dest.sync_all().await?;

        let staging = self.staging_dir(upload_id);
        if let Err(e) = fs::remove_dir_all(&staging).await {
            tracing::warn!(
                error = %e,
                upload_id = %upload_id,
                "Failed to remove multipart staging directory"
            );
        }
        self.uploads.lock().await.remove(upload_id);

        tracing::info!(
            key = %key,
            upload_id = %upload_id,
            parts = parts.len(),
            size_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local multipart upload completed"
        );

        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.uploads.lock().await.remove(upload_id);

        let staging = self.staging_dir(upload_id);
        if fs::try_exists(&staging).await.unwrap_or(false) {
            fs::remove_dir_all(&staging).await.map_err(|e| {
                StorageError::DeleteFailed(format!(
                    "Failed to remove staging directory {}: {}",
                    staging.display(),
                    e
                ))
            })?;
        }

        tracing::info!(upload_id = %upload_id, "Local multipart upload aborted");

        Ok(())
    }

    fn supports_presigned_transfer(&self) -> bool {
        false
    }

    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(dir.path(), "http://localhost:4000/media".to_string())
            .await
            .unwrap()
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_put_then_open_stream_round_trips() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let data = b"round trip payload".to_vec();
        storage
            .put("files/o1/test.txt", Bytes::from(data.clone()), "text/plain")
            .await
            .unwrap();

        let stream = storage.open_stream("files/o1/test.txt", None).await.unwrap();
        assert_eq!(collect(stream).await, data);
        assert_eq!(storage.size("files/o1/test.txt").await.unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_ranged_read_returns_exact_slice() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let data: Vec<u8> = (0u8..=255).collect();
        storage
            .put("files/o1/bytes.bin", Bytes::from(data.clone()), "application/octet-stream")
            .await
            .unwrap();

        let stream = storage
            .open_stream("files/o1/bytes.bin", Some(ByteRange::new(10, 19)))
            .await
            .unwrap();
        let got = collect(stream).await;
        assert_eq!(got.len(), 10);
        assert_eq!(got, data[10..=19].to_vec());

        let result = storage
            .open_stream("files/o1/bytes.bin", Some(ByteRange::new(0, 256)))
            .await;
        assert!(matches!(
            result,
            Err(StorageError::RangeUnsatisfiable { size: 256 })
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let result = storage.open_stream("../../../etc/passwd", None).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.size("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        assert!(storage.delete("files/o1/nope.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_multipart_happy_path_concatenates_in_order() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let key = "files/o1/big.bin";
        let upload_id = storage
            .begin_multipart(key, "application/octet-stream")
            .await
            .unwrap();

        // Upload out of order; completion order is what matters.
        let id2 = storage
            .acknowledge_part(key, &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let id1 = storage
            .acknowledge_part(key, &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();

        storage
            .complete_multipart(
                key,
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        part_id: id1,
                    },
                    CompletedPart {
                        part_number: 2,
                        part_id: id2,
                    },
                ],
            )
            .await
            .unwrap();

        let stream = storage.open_stream(key, None).await.unwrap();
        assert_eq!(collect(stream).await, b"hello world");

        // Staging is gone; a second complete is an unknown upload.
        let result = storage
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    part_id: "x".to_string(),
                }],
            )
            .await;
        assert!(matches!(result, Err(StorageError::UploadNotFound(_))));
    }

    #[tokio::test]
    async fn test_multipart_missing_part_fails_and_stays_retryable() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let key = "files/o1/partial.bin";
        let upload_id = storage
            .begin_multipart(key, "application/octet-stream")
            .await
            .unwrap();

        let id1 = storage
            .acknowledge_part(key, &upload_id, 1, Bytes::from_static(b"aaaa"))
            .await
            .unwrap();
        let id3 = storage
            .acknowledge_part(key, &upload_id, 3, Bytes::from_static(b"cccc"))
            .await
            .unwrap();

        // Gap at part 2: rejected, no final object.
        let result = storage
            .complete_multipart(
                key,
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        part_id: id1.clone(),
                    },
                    CompletedPart {
                        part_number: 3,
                        part_id: id3.clone(),
                    },
                ],
            )
            .await;
        assert!(matches!(result, Err(StorageError::PartMismatch(_))));
        assert!(matches!(
            storage.size(key).await,
            Err(StorageError::NotFound(_))
        ));

        // Supply the missing part and retry.
        let id2 = storage
            .acknowledge_part(key, &upload_id, 2, Bytes::from_static(b"bbbb"))
            .await
            .unwrap();
        storage
            .complete_multipart(
                key,
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        part_id: id1,
                    },
                    CompletedPart {
                        part_number: 2,
                        part_id: id2,
                    },
                    CompletedPart {
                        part_number: 3,
                        part_id: id3,
                    },
                ],
            )
            .await
            .unwrap();

        let stream = storage.open_stream(key, None).await.unwrap();
        assert_eq!(collect(stream).await, b"aaaabbbbcccc");
    }

    #[tokio::test]
    async fn test_multipart_part_retry_replaces_identifier() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let key = "files/o1/retry.bin";
        let upload_id = storage
            .begin_multipart(key, "application/octet-stream")
            .await
            .unwrap();

        let first = storage
            .acknowledge_part(key, &upload_id, 1, Bytes::from_static(b"draft"))
            .await
            .unwrap();
        let second = storage
            .acknowledge_part(key, &upload_id, 1, Bytes::from_static(b"final"))
            .await
            .unwrap();
        assert_ne!(first, second);

        // The stale identifier no longer completes.
        let result = storage
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    part_id: first,
                }],
            )
            .await;
        assert!(matches!(result, Err(StorageError::PartMismatch(_))));

        storage
            .complete_multipart(
                key,
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    part_id: second,
                }],
            )
            .await
            .unwrap();

        let stream = storage.open_stream(key, None).await.unwrap();
        assert_eq!(collect(stream).await, b"final");
    }

    #[tokio::test]
    async fn test_abort_multipart_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let key = "files/o1/aborted.bin";
        let upload_id = storage
            .begin_multipart(key, "application/octet-stream")
            .await
            .unwrap();
        storage
            .acknowledge_part(key, &upload_id, 1, Bytes::from_static(b"junk"))
            .await
            .unwrap();

        storage.abort_multipart(key, &upload_id).await.unwrap();
        // Second abort and unknown ids are fine.
        storage.abort_multipart(key, &upload_id).await.unwrap();
        storage.abort_multipart(key, "no-such-upload").await.unwrap();

        assert!(!fs::try_exists(storage.staging_dir(&upload_id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rename_prefix_moves_objects() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        storage
            .put("files/old/a.txt", Bytes::from_static(b"a"), "text/plain")
            .await
            .unwrap();
        storage
            .put("files/old/b.txt", Bytes::from_static(b"b"), "text/plain")
            .await
            .unwrap();

        let moved = storage.rename_prefix("files/old", "files/new").await.unwrap();
        assert_eq!(moved, 2);

        assert!(storage.size("files/new/a.txt").await.is_ok());
        assert!(matches!(
            storage.size("files/old/a.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
