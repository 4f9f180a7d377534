//! Storage backend factory.
//!
//! Owns at most one cached backend for the current configuration snapshot.
//! The factory is an injected dependency (held by application state), not a
//! module-level singleton, so tests and reconfiguration never leak cached
//! backends across scopes.

use crate::traits::{Storage, StorageError, StorageResult};
#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-object")]
use crate::ObjectStorage;
use skiff_core::{StorageProvider, StorageSettings};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct StorageFactory {
    settings: RwLock<StorageSettings>,
    cached: RwLock<Option<Arc<dyn Storage>>>,
}

impl StorageFactory {
    pub fn new(settings: StorageSettings) -> Self {
        StorageFactory {
            settings: RwLock::new(settings),
            cached: RwLock::new(None),
        }
    }

    /// Return the active backend, constructing and caching it on first use.
    ///
    /// When object-storage construction fails (unreachable endpoint, bad
    /// credentials), the factory falls back to the local backend rather than
    /// leaving the system without storage.
    pub async fn get_active(&self) -> StorageResult<Arc<dyn Storage>> {
        if let Some(storage) = self.cached.read().await.clone() {
            return Ok(storage);
        }

        let mut guard = self.cached.write().await;
        // Another task may have built the backend while we waited.
        if let Some(storage) = guard.clone() {
            return Ok(storage);
        }

        let settings = self.settings.read().await.clone();
        let storage = Self::build(&settings).await?;
        *guard = Some(storage.clone());
        Ok(storage)
    }

    /// Drop the cached backend so the next `get_active()` rebuilds from the
    /// current settings. Callers that mutate storage configuration are
    /// responsible for invoking this.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Replace the settings snapshot and invalidate the cache.
    pub async fn update_settings(&self, settings: StorageSettings) {
        *self.settings.write().await = settings;
        self.invalidate().await;
    }

    async fn build(settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        match settings.provider {
            #[cfg(feature = "storage-object")]
            StorageProvider::ObjectStorage => {
                let bucket = settings.s3_bucket.clone().ok_or_else(|| {
                    StorageError::ConfigError("S3_BUCKET not configured".to_string())
                });
                let region = settings
                    .s3_region
                    .clone()
                    .unwrap_or_else(|| "us-east-1".to_string());

                let built = match bucket {
                    Ok(bucket) => {
                        ObjectStorage::new(bucket, region, settings.s3_endpoint.clone()).await
                    }
                    Err(e) => Err(e),
                };

                match built {
                    Ok(storage) => Ok(Arc::new(storage)),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Object storage construction failed, falling back to local backend"
                        );
                        Self::build_local(settings).await
                    }
                }
            }

            #[cfg(not(feature = "storage-object"))]
            StorageProvider::ObjectStorage => {
                tracing::warn!(
                    "Object storage backend not compiled in (storage-object feature), using local backend"
                );
                Self::build_local(settings).await
            }

            StorageProvider::Local => Self::build_local(settings).await,
        }
    }

    #[cfg(feature = "storage-local")]
    async fn build_local(settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        let storage = LocalStorage::new(
            settings.local_storage_path.clone(),
            format!(
                "{}/media",
                settings.public_base_url.trim_end_matches('/')
            ),
        )
        .await?;
        Ok(Arc::new(storage))
    }

    #[cfg(not(feature = "storage-local"))]
    async fn build_local(_settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        ))
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::traits::StorageBackendKind;

    fn settings(provider: StorageProvider, path: &std::path::Path) -> StorageSettings {
        StorageSettings {
            provider,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: path.to_string_lossy().into_owned(),
            public_base_url: "http://localhost:4000".to_string(),
        }
    }

    #[tokio::test]
    async fn local_provider_builds_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let factory = StorageFactory::new(settings(StorageProvider::Local, dir.path()));

        let storage = factory.get_active().await.unwrap();
        assert_eq!(storage.kind(), StorageBackendKind::Local);
        assert!(!storage.supports_presigned_transfer());
    }

    #[tokio::test]
    async fn object_provider_without_bucket_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        // No bucket configured: object-storage construction cannot succeed.
        let factory = StorageFactory::new(settings(StorageProvider::ObjectStorage, dir.path()));

        let storage = factory.get_active().await.unwrap();
        assert_eq!(storage.kind(), StorageBackendKind::Local);
    }

    #[tokio::test]
    async fn get_active_caches_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let factory = StorageFactory::new(settings(StorageProvider::Local, dir.path()));

        let first = factory.get_active().await.unwrap();
        let second = factory.get_active().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        factory.invalidate().await;
        let third = factory.get_active().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn update_settings_rebuilds_backend() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let factory = StorageFactory::new(settings(StorageProvider::Local, dir_a.path()));

        let first = factory.get_active().await.unwrap();
        factory
            .update_settings(settings(StorageProvider::Local, dir_b.path()))
            .await;
        let second = factory.get_active().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
