//! Configuration module
//!
//! Env-based configuration for the API server, storage backends, upload
//! limits, and background workers. Loaded once at startup; the storage
//! section is snapshotted into [`StorageSettings`] so the backend factory can
//! be rebuilt after a configuration change.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

// Common defaults
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_UPLOAD_SIZE_MB: u64 = 2048;
const DEFAULT_QUOTA_GB: u64 = 10;
const SESSION_REAP_INTERVAL_SECS: u64 = 900;
const EXTRACTION_QUEUE_SIZE: usize = 256;

/// Storage provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    ObjectStorage,
}

impl FromStr for StorageProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageProvider::Local),
            "object" | "objectstorage" | "s3" => Ok(StorageProvider::ObjectStorage),
            _ => Err(anyhow::anyhow!("Invalid storage provider: {}", s)),
        }
    }
}

impl Display for StorageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageProvider::Local => write!(f, "local"),
            StorageProvider::ObjectStorage => write!(f, "object"),
        }
    }
}

/// Read-only snapshot of the storage section of the configuration.
///
/// The backend factory caches one backend per snapshot; callers that change
/// storage configuration must invalidate the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub provider: StorageProvider,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub local_storage_path: String,
    pub public_base_url: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Storage
    pub storage: StorageSettings,
    // Upload limits
    pub max_upload_size_bytes: u64,
    pub default_quota_bytes: i64,
    pub chunk_size_bytes: u64,
    pub direct_upload_threshold_bytes: u64,
    // Session lifecycle
    pub session_ttl_hours: i64,
    pub session_reap_interval_secs: u64,
    pub presigned_url_ttl_secs: u64,
    // Extraction queue
    pub extraction_concurrency: usize,
    pub extraction_queue_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let provider = env::var("STORAGE_PROVIDER")
            .ok()
            .and_then(|s| s.parse::<StorageProvider>().ok())
            .unwrap_or(StorageProvider::Local);

        let storage = StorageSettings {
            provider,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").or_else(|_| env::var("AWS_REGION")).ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/files".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:4000".to_string()),
        };

        let max_upload_size_mb = env::var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|_| MAX_UPLOAD_SIZE_MB.to_string())
            .parse::<u64>()
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let default_quota_gb = env::var("DEFAULT_QUOTA_GB")
            .unwrap_or_else(|_| DEFAULT_QUOTA_GB.to_string())
            .parse::<u64>()
            .unwrap_or(DEFAULT_QUOTA_GB);

        let chunk_size_bytes = env::var("CHUNK_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(crate::constants::CHUNK_SIZE_BYTES);

        let config = Config {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            storage,
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            default_quota_bytes: (default_quota_gb * 1024 * 1024 * 1024) as i64,
            chunk_size_bytes,
            direct_upload_threshold_bytes: env::var("DIRECT_UPLOAD_THRESHOLD_MB")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(crate::constants::DIRECT_UPLOAD_THRESHOLD_BYTES),
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(crate::constants::SESSION_TTL_HOURS),
            session_reap_interval_secs: env::var("SESSION_REAP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(SESSION_REAP_INTERVAL_SECS),
            presigned_url_ttl_secs: env::var("PRESIGNED_URL_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(crate::constants::PRESIGNED_URL_TTL_SECS),
            extraction_concurrency: env::var("EXTRACTION_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            extraction_queue_size: env::var("EXTRACTION_QUEUE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(EXTRACTION_QUEUE_SIZE)
                .max(1),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("chunk size must be greater than 0"));
        }
        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("max upload size must be greater than 0"));
        }
        if self.storage.provider == StorageProvider::ObjectStorage
            && self.storage.s3_bucket.is_none()
        {
            return Err(anyhow::anyhow!(
                "S3_BUCKET must be set when STORAGE_PROVIDER is object"
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    /// Snapshot of the storage section, consumed by the backend factory.
    pub fn storage_settings(&self) -> StorageSettings {
        self.storage.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_provider_parses_aliases() {
        assert_eq!(
            "local".parse::<StorageProvider>().unwrap(),
            StorageProvider::Local
        );
        assert_eq!(
            "objectStorage".parse::<StorageProvider>().unwrap(),
            StorageProvider::ObjectStorage
        );
        assert_eq!(
            "s3".parse::<StorageProvider>().unwrap(),
            StorageProvider::ObjectStorage
        );
        assert!("tape".parse::<StorageProvider>().is_err());
    }

    #[test]
    fn validate_rejects_object_provider_without_bucket() {
        let config = Config {
            server_port: 4000,
            cors_origins: vec!["*".to_string()],
            environment: "development".to_string(),
            database_url: "postgres://localhost/skiff".to_string(),
            db_max_connections: 5,
            db_timeout_seconds: 30,
            storage: StorageSettings {
                provider: StorageProvider::ObjectStorage,
                s3_bucket: None,
                s3_region: Some("us-east-1".to_string()),
                s3_endpoint: None,
                local_storage_path: "./data/files".to_string(),
                public_base_url: "http://localhost:4000".to_string(),
            },
            max_upload_size_bytes: 1024,
            default_quota_bytes: 1024,
            chunk_size_bytes: 1024,
            direct_upload_threshold_bytes: 1024,
            session_ttl_hours: 24,
            session_reap_interval_secs: 900,
            presigned_url_ttl_secs: 900,
            extraction_concurrency: 1,
            extraction_queue_size: 16,
        };
        assert!(config.validate().is_err());
    }
}
