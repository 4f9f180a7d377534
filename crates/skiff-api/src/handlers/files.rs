//! Owner-facing file management: list, access updates, deletion.

use crate::auth::Owner;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::passwords;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use skiff_core::models::{FileResponse, UpdateFileRequest};
use skiff_core::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// List the owner's files, newest first
#[utoipa::path(
    get,
    path = "/api/v1/files",
    tag = "files",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (max 200)"),
        ("offset" = Option<i64>, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Files owned by the caller", body = [FileResponse]),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse)
    )
)]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let records = state
        .db
        .files
        .list_by_owner(owner.user.id, limit, offset)
        .await?;

    let files: Vec<FileResponse> = records.iter().map(FileResponse::from).collect();
    Ok(Json(files))
}

/// Update visibility or password of a file
#[utoipa::path(
    patch,
    path = "/api/v1/files/{id}",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    request_body = UpdateFileRequest,
    responses(
        (status = 200, description = "Updated file", body = FileResponse),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(file_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateFileRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let password_update = if request.clear_password {
        Some(None)
    } else {
        match &request.password {
            Some(password) if !password.is_empty() => {
                Some(Some(passwords::hash_password(password)?))
            }
            _ => None,
        }
    };

    let record = state
        .db
        .files
        .update_access(owner.user.id, file_id, request.visibility, password_update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

    tracing::info!(file_id = %file_id, "File access settings updated");

    Ok(Json(FileResponse::from(&record)))
}

/// Delete a file, refunding its quota
#[utoipa::path(
    delete,
    path = "/api/v1/files/{id}",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 204, description = "File deleted"),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    // Record and quota go first, in one transaction; the object delete is
    // idempotent and an orphaned object is only a warning.
    let record = state
        .db
        .files
        .delete(owner.user.id, file_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;
    if let Err(e) = backend.delete(&record.storage_key).await {
        tracing::warn!(
            error = %e,
            storage_key = %record.storage_key,
            "Failed to delete object for removed file record"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}
