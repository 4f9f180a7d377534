//! Single-request upload for files under the chunking threshold.

use crate::auth::Owner;
use crate::error::{ErrorResponse, HttpAppError};
use crate::handlers::chunked_upload::notify_extraction;
use crate::naming;
use crate::passwords;
use crate::state::AppState;
use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use skiff_core::models::{UploadedFileResponse, Visibility};
use skiff_core::AppError;
use skiff_db::NewFile;
use skiff_storage::keys;
use std::sync::Arc;

struct UploadForm {
    filename: String,
    content_type: String,
    data: Bytes,
    visibility: Visibility,
    password: Option<String>,
    random_url: bool,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut visibility = Visibility::Private;
    let mut password = None;
    let mut random_url = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AppError::InvalidInput("File part needs a filename".to_string()))?;
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| {
                        mime_guess::from_path(&filename)
                            .first_or_octet_stream()
                            .essence_str()
                            .to_string()
                    });
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Failed to read file: {}", e)))?;
                file = Some((filename, content_type, data));
            }
            "visibility" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Invalid visibility: {}", e)))?;
                visibility = text.parse().map_err(|_| {
                    AppError::InvalidInput(format!("Invalid visibility: {}", text))
                })?;
            }
            "password" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Invalid password: {}", e)))?;
                if !text.is_empty() {
                    password = Some(text);
                }
            }
            "random_url" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("Invalid random_url: {}", e)))?;
                random_url = text == "true" || text == "1";
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown upload form field");
            }
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| AppError::InvalidInput("Missing file field".to_string()))?;

    if data.is_empty() {
        return Err(AppError::InvalidInput("File is empty".to_string()));
    }

    Ok(UploadForm {
        filename,
        content_type,
        data,
        visibility,
        password,
        random_url,
    })
}

/// Direct (non-chunked) upload
#[utoipa::path(
    post,
    path = "/api/v1/files",
    tag = "files",
    responses(
        (status = 200, description = "File uploaded", body = UploadedFileResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 413, description = "File too large or quota exceeded", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(owner_id = %owner.user.id))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let form = read_form(multipart).await?;
    let size = form.data.len() as u64;

    if size > state.limits.max_upload_size_bytes {
        return Err(HttpAppError::from(AppError::PayloadTooLarge(format!(
            "File size exceeds maximum allowed ({} MB)",
            state.limits.max_upload_size_bytes / 1024 / 1024
        ))));
    }

    // Reject before any storage write.
    if !owner.user.can_store(size as i64) {
        return Err(HttpAppError::from(AppError::QuotaExceeded {
            used: owner.user.storage_used_bytes,
            quota: owner.user.quota_bytes,
            requested: size as i64,
        }));
    }

    let password_hash = match &form.password {
        Some(password) => Some(passwords::hash_password(password)?),
        None => None,
    };

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;

    for filename in naming::name_candidates(&form.filename, form.random_url) {
        if state.db.files.get_by_url_path(&filename).await?.is_some() {
            continue;
        }
        if state.db.sessions.url_path_in_use(&filename).await? {
            continue;
        }

        let storage_key = keys::storage_key(owner.user.id, &filename);

        backend
            .put(&storage_key, form.data.clone(), &form.content_type)
            .await
            .map_err(HttpAppError::from)?;

        let new_file = NewFile {
            owner_id: owner.user.id,
            display_name: form.filename.clone(),
            storage_key: storage_key.clone(),
            url_path: filename.clone(),
            content_type: form.content_type.clone(),
            size_bytes: size as i64,
            visibility: form.visibility,
            password_hash: password_hash.clone(),
        };

        match state.db.files.try_create(new_file).await {
            Ok(record) => {
                notify_extraction(&state, &record);
                tracing::info!(
                    file_id = %record.id,
                    storage_key = %storage_key,
                    size_bytes = record.size_bytes,
                    "Direct upload completed"
                );
                return Ok(Json(UploadedFileResponse {
                    id: record.id,
                    url: format!("/f/{}", record.url_path),
                    name: record.display_name,
                    size: record.size_bytes,
                    content_type: record.content_type,
                    uploaded_at: record.uploaded_at,
                }));
            }
            Err(e) => {
                // The record did not materialize; remove the orphaned object.
                if let Err(cleanup_err) = backend.delete(&storage_key).await {
                    tracing::warn!(
                        error = %cleanup_err,
                        storage_key = %storage_key,
                        "Failed to clean up object after record insert failure"
                    );
                }
                match e {
                    AppError::Conflict(_) => continue,
                    other => return Err(HttpAppError::from(other)),
                }
            }
        }
    }

    Err(HttpAppError::from(AppError::Conflict(
        "Could not allocate a unique name for this file".to_string(),
    )))
}
