//! Application state and sub-state extractors.
//!
//! AppState is split into domain sub-states so handlers can extract only
//! what they need via Axum's `FromRef`. The storage factory is injected
//! here rather than living in a module-level singleton, so tests and
//! reconfiguration never share cached backends.

use skiff_core::Config;
use skiff_db::{FileRepository, UploadSessionRepository, UserRepository};
use skiff_storage::StorageFactory;
use skiff_worker::ExtractionQueue;
use sqlx::PgPool;
use std::sync::Arc;

/// Database pool and repositories.
#[derive(Clone)]
pub struct DbState {
    pub pool: PgPool,
    pub users: UserRepository,
    pub files: FileRepository,
    pub sessions: UploadSessionRepository,
}

impl DbState {
    pub fn new(pool: PgPool) -> Self {
        DbState {
            users: UserRepository::new(pool.clone()),
            files: FileRepository::new(pool.clone()),
            sessions: UploadSessionRepository::new(pool.clone()),
            pool,
        }
    }
}

/// Upload admission limits, resolved once from configuration.
#[derive(Clone, Debug)]
pub struct UploadLimits {
    pub max_upload_size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub direct_upload_threshold_bytes: u64,
    pub presigned_url_ttl: std::time::Duration,
}

/// Main application state: aggregates sub-states for dependency injection.
#[derive(Clone)]
pub struct AppState {
    pub db: DbState,
    pub storage: Arc<StorageFactory>,
    pub limits: UploadLimits,
    pub extraction: ExtractionQueue,
    pub config: Config,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        storage: Arc<StorageFactory>,
        extraction: ExtractionQueue,
        config: Config,
    ) -> Self {
        let limits = UploadLimits {
            max_upload_size_bytes: config.max_upload_size_bytes,
            chunk_size_bytes: config.chunk_size_bytes,
            direct_upload_threshold_bytes: config.direct_upload_threshold_bytes,
            presigned_url_ttl: std::time::Duration::from_secs(config.presigned_url_ttl_secs),
        };

        AppState {
            db: DbState::new(pool),
            storage,
            limits,
            extraction,
            config,
        }
    }
}

// ----- FromRef for sub-state extraction -----

impl axum::extract::FromRef<Arc<AppState>> for DbState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.db.clone()
    }
}

impl axum::extract::FromRef<Arc<AppState>> for UploadLimits {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.limits.clone()
    }
}

fn _assert_app_state_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<AppState>();
    assert_sync::<AppState>();
}
