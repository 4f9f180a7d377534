use crate::traits::{
    check_contiguous, ByteRange, ByteStream, CompletedPart, PartTarget, Storage,
    StorageBackendKind, StorageError, StorageResult,
};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::multipart::{MultipartStore, PartId};
use object_store::MultipartId;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    GetOptions, GetRange, ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult,
};
use std::time::Duration;

/// S3-compatible object storage implementation.
///
/// Multipart uploads delegate to the store's native multipart API; part
/// targets are presigned PUT URLs so bytes can move directly between the
/// client and the object store.
#[derive(Clone)]
pub struct ObjectStorage {
    store: AmazonS3,
    /// SDK client used only for presigning part-upload URLs; the object_store
    /// signer cannot express the uploadId/partNumber query parameters.
    sdk: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStorage {
    /// Create a new ObjectStorage instance
    ///
    /// # Arguments
    /// * `bucket` - Bucket name
    /// * `region` - Region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible
    ///   providers (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));
        if let Some(ref endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared_config = loader.load().await;
        let mut sdk_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if endpoint_url.is_some() {
            // S3-compatible providers generally require path-style addressing.
            sdk_builder = sdk_builder.force_path_style(true);
        }
        let sdk = aws_sdk_s3::Client::from_conf(sdk_builder.build());

        tracing::info!(
            bucket = %bucket,
            region = %region,
            endpoint = ?endpoint_url,
            "Object storage backend configured"
        );

        Ok(ObjectStorage { store, sdk, bucket })
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let size = data.len() as u64;
        let location = Path::from(key.to_string());
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object storage put failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object storage put successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, key = %key, "Object storage delete successful");
                Ok(())
            }
            // Deleting a missing key is already satisfied.
            Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    "Object storage delete failed"
                );
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    async fn open_stream(&self, key: &str, range: Option<ByteRange>) -> StorageResult<ByteStream> {
        let location = Path::from(key.to_string());

        if let Some(range) = range {
            let size = self.size(key).await?;
            range.check_within(size)?;
        }

        let options = GetOptions {
            range: range.map(|r| GetRange::Bounded(r.start..r.end + 1)),
            ..Default::default()
        };

        let result: ObjectResult<_> = self.store.get_opts(&location, options).await;

        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        let stream = result.into_stream().map(|res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(StorageError::DownloadFailed(e.to_string())),
        });

        Ok(Box::pin(stream))
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let location = Path::from(key.to_string());
        match self.store.head(&location).await {
            Ok(meta) => Ok(meta.size),
            Err(ObjectStoreError::NotFound { .. }) => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn retrieval_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> = self.store.signed_url(Method::GET, &location, ttl).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    async fn rename_prefix(&self, old_prefix: &str, new_prefix: &str) -> StorageResult<u64> {
        let old_prefix = old_prefix.trim_matches('/').to_string();
        let new_prefix = new_prefix.trim_matches('/').to_string();
        let prefix_path = Path::from(old_prefix.clone());

        let mut listing = self.store.list(Some(&prefix_path));
        let mut moved = 0u64;

        while let Some(entry) = listing.next().await {
            let meta = entry.map_err(|e| StorageError::BackendError(e.to_string()))?;
            let old_key = meta.location.to_string();
            let suffix = old_key
                .strip_prefix(&old_prefix)
                .unwrap_or(old_key.as_str())
                .trim_start_matches('/');
            let new_location = Path::from(format!("{}/{}", new_prefix, suffix));

            let copy_result: ObjectResult<_> = self.store.copy(&meta.location, &new_location).await;
            copy_result.map_err(|e| StorageError::BackendError(e.to_string()))?;

            let delete_result: ObjectResult<_> = self.store.delete(&meta.location).await;
            delete_result.map_err(|e| StorageError::BackendError(e.to_string()))?;

            moved += 1;
        }

        tracing::info!(
            bucket = %self.bucket,
            old_prefix = %old_prefix,
            new_prefix = %new_prefix,
            moved = moved,
            "Object storage prefix rename successful"
        );

        Ok(moved)
    }

    async fn begin_multipart(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        let location = Path::from(key.to_string());

        let upload_id = self
            .store
            .create_multipart(&location)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            upload_id = %upload_id,
            "Native multipart upload started"
        );

        Ok(upload_id)
    }

    async fn part_target(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> StorageResult<PartTarget> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let request = self
            .sdk
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(PartTarget::Presigned {
            url: request.uri().to_string(),
            expires_in: ttl,
        })
    }

    async fn acknowledge_part(
        &self,
        key: &str,
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

        let location = Path::from(key.to_string());
        let id: MultipartId = upload_id.to_string();
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        let part = self
            .store
            .put_part(
                &location,
                &id,
                (part_number - 1) as usize,
                PutPayload::from(data),
            )
            .await
            .map_err(|e| match e {
                ObjectStoreError::NotFound { .. } => {
                    StorageError::UploadNotFound(upload_id.to_string())
                }
                other => StorageError::UploadFailed(other.to_string()),
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            upload_id = %upload_id,
            part_number = part_number,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Native multipart part uploaded"
        );

        Ok(part.content_id)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        check_contiguous(parts)?;

        let location = Path::from(key.to_string());
        let id: MultipartId = upload_id.to_string();
        let part_ids: Vec<PartId> = parts
            .iter()
            .map(|p| PartId {
                content_id: p.part_id.clone(),
            })
            .collect();

        let start = std::time::Instant::now();

        self.store
            .complete_multipart(&location, &id, part_ids)
            .await
            .map_err(|e| match e {
                ObjectStoreError::NotFound { .. } => {
                    StorageError::UploadNotFound(upload_id.to_string())
                }
                other => StorageError::UploadFailed(other.to_string()),
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            upload_id = %upload_id,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Native multipart upload completed"
        );

        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        let location = Path::from(key.to_string());
        let id: MultipartId = upload_id.to_string();

        match self.store.abort_multipart(&location, &id).await {
            Ok(_) => Ok(()),
            Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    fn supports_presigned_transfer(&self) -> bool {
        true
    }

    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::ObjectStorage
    }
}
