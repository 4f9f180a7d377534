//! Application assembly: database pool, storage factory, extraction queue,
//! router, and background tasks.

pub mod server;

use crate::api_doc::ApiDoc;
use crate::handlers::{chunked_upload, direct_upload, download, files};
use crate::reaper::spawn_session_reaper;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use skiff_core::Config;
use skiff_db::FileRepository;
use skiff_storage::StorageFactory;
use skiff_worker::{ExtractionQueue, PdfTextExtractor, StorageExtractionHandler};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Build the database pool, run migrations, wire services, and assemble the
/// router. Returns the state for callers that need direct access (tests,
/// background tasks).
pub async fn initialize_app(config: Config) -> anyhow::Result<(Arc<AppState>, Router)> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .connect(&config.database_url)
        .await?;

    skiff_db::MIGRATOR.run(&pool).await?;

    let storage = Arc::new(StorageFactory::new(config.storage_settings()));
    // Construct eagerly so a misconfigured backend falls back at startup,
    // not on the first upload.
    let backend = storage.get_active().await?;
    tracing::info!(backend = %backend.kind(), "Storage backend ready");

    let extraction_handler = Arc::new(StorageExtractionHandler::new(
        storage.clone(),
        FileRepository::new(pool.clone()),
        Arc::new(PdfTextExtractor),
    ));
    let extraction = ExtractionQueue::new(
        extraction_handler,
        config.extraction_concurrency,
        config.extraction_queue_size,
    );

    let state = Arc::new(AppState::new(pool, storage, extraction, config));

    spawn_session_reaper(state.clone());

    let router = build_router(state.clone());
    Ok((state, router))
}

async fn health() -> &'static str {
    "ok"
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assemble the router against an existing state; split out so tests can
/// drive the full HTTP surface without a network listener.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Room for the largest direct upload plus multipart form overhead.
    let body_limit = state.limits.max_upload_size_bytes as usize + 1024 * 1024;

    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/api-docs/openapi.json", get(openapi))
        .route(
            "/api/v1/files",
            post(direct_upload::upload_file).get(files::list_files),
        )
        .route(
            "/api/v1/files/{id}",
            axum::routing::patch(files::update_file).delete(files::delete_file),
        )
        .route("/api/v1/uploads", post(chunked_upload::start_upload))
        .route(
            "/api/v1/uploads/{session_id}",
            axum::routing::delete(chunked_upload::abort_upload),
        )
        .route(
            "/api/v1/uploads/{session_id}/progress",
            get(chunked_upload::upload_progress),
        )
        .route(
            "/api/v1/uploads/{session_id}/complete",
            post(chunked_upload::complete_upload),
        )
        .route(
            "/api/v1/uploads/{session_id}/parts/{part_number}",
            put(chunked_upload::receive_part),
        )
        .route(
            "/api/v1/uploads/{session_id}/parts/{part_number}/target",
            get(chunked_upload::part_target),
        )
        .route("/f/{url_path}", get(download::download_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
