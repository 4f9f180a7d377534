//! Chunked upload handlers for large files.
//!
//! Resumable uploads over the storage backend's multipart primitives;
//! completion registers the file record and charges quota in one
//! transaction.

use crate::auth::Owner;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::naming;
use crate::passwords;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use skiff_core::constants::MAX_CHUNK_COUNT;
use skiff_core::models::{
    CompleteUploadRequest, FileRecord, PartTargetResponse, ReceivePartResponse, SessionStatus,
    StartUploadRequest, StartUploadResponse, UploadProgressResponse, UploadedFileResponse,
};
use skiff_core::AppError;
use skiff_db::{NewFile, NewUploadSession, UploadSessionRow};
use skiff_storage::{keys, CompletedPart, PartTarget};
use skiff_worker::{is_extraction_eligible, ExtractionJob};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Start a chunked upload session
#[utoipa::path(
    post,
    path = "/api/v1/uploads",
    tag = "uploads",
    request_body = StartUploadRequest,
    responses(
        (status = 200, description = "Upload session started", body = StartUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 413, description = "File too large or quota exceeded", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(owner_id = %owner.user.id, filename = %request.filename))]
pub async fn start_upload(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    ValidatedJson(request): ValidatedJson<StartUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate().map_err(AppError::from)?;

    if request.total_size > state.limits.max_upload_size_bytes {
        return Err(HttpAppError::from(AppError::PayloadTooLarge(format!(
            "File size exceeds maximum allowed ({} MB)",
            state.limits.max_upload_size_bytes / 1024 / 1024
        ))));
    }

    // Quota admission happens before any storage write.
    if !owner.user.can_store(request.total_size as i64) {
        return Err(HttpAppError::from(AppError::QuotaExceeded {
            used: owner.user.storage_used_bytes,
            quota: owner.user.quota_bytes,
            requested: request.total_size as i64,
        }));
    }

    let chunk_size = state.limits.chunk_size_bytes;
    let total_chunks = request.total_size.div_ceil(chunk_size);
    if total_chunks > MAX_CHUNK_COUNT as u64 {
        return Err(HttpAppError::from(AppError::InvalidInput(format!(
            "Chunk count {} exceeds maximum {}",
            total_chunks, MAX_CHUNK_COUNT
        ))));
    }
    let total_chunks = total_chunks as i32;

    let password_hash = match &request.password {
        Some(password) if !password.is_empty() => Some(passwords::hash_password(password)?),
        _ => None,
    };

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;

    for filename in naming::name_candidates(&request.filename, request.random_url) {
        // Fast-path existence checks; the unique constraints below are the
        // authoritative guard.
        if state.db.files.get_by_url_path(&filename).await?.is_some() {
            continue;
        }
        if state.db.sessions.url_path_in_use(&filename).await? {
            continue;
        }

        let storage_key = keys::storage_key(owner.user.id, &filename);
        let backend_upload_id = backend
            .begin_multipart(&storage_key, &request.content_type)
            .await
            .map_err(HttpAppError::from)?;

        let session_id = Uuid::new_v4();
        let session = NewUploadSession {
            id: session_id,
            owner_id: owner.user.id,
            display_name: request.filename.clone(),
            storage_key: storage_key.clone(),
            url_path: filename.clone(),
            content_type: request.content_type.clone(),
            total_size: request.total_size as i64,
            chunk_size: chunk_size as i64,
            total_chunks,
            backend_upload_id: backend_upload_id.clone(),
            visibility: request.visibility,
            password_hash: password_hash.clone(),
        };

        match state.db.sessions.try_create(session).await {
            Ok(()) => {
                tracing::info!(
                    session_id = %session_id,
                    storage_key = %storage_key,
                    total_chunks = total_chunks,
                    "Started chunked upload session"
                );
                return Ok(Json(StartUploadResponse {
                    session_id,
                    storage_key,
                    chunk_size,
                    total_chunks,
                }));
            }
            Err(AppError::Conflict(_)) => {
                // Lost the reservation race; release the backend upload and
                // move on to the next candidate.
                if let Err(e) = backend.abort_multipart(&storage_key, &backend_upload_id).await {
                    tracing::warn!(error = %e, storage_key = %storage_key, "Failed to abort multipart after name conflict");
                }
                continue;
            }
            Err(e) => {
                if let Err(abort_err) =
                    backend.abort_multipart(&storage_key, &backend_upload_id).await
                {
                    tracing::warn!(error = %abort_err, storage_key = %storage_key, "Failed to abort multipart after session error");
                }
                return Err(HttpAppError::from(e));
            }
        }
    }

    Err(HttpAppError::from(AppError::Conflict(
        "Could not allocate a unique name for this file".to_string(),
    )))
}

/// Look up a session, enforcing ownership.
async fn owned_session(
    state: &Arc<AppState>,
    owner: &Owner,
    session_id: Uuid,
) -> Result<UploadSessionRow, AppError> {
    state
        .db
        .sessions
        .get(owner.user.id, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Upload session not found: {}", session_id)))
}

/// Expected byte length of one part: every part is exactly chunk-sized
/// except the final remainder.
fn expected_part_size(session: &UploadSessionRow, part_number: i32) -> u64 {
    let chunk_size = session.chunk_size as u64;
    let total_size = session.total_size as u64;
    if part_number < session.total_chunks {
        chunk_size
    } else {
        total_size - chunk_size * (session.total_chunks as u64 - 1)
    }
}

fn check_part_number(session: &UploadSessionRow, part_number: i32) -> Result<(), AppError> {
    if part_number < 1 || part_number > session.total_chunks {
        return Err(AppError::InvalidInput(format!(
            "Part number {} out of range 1..={}",
            part_number, session.total_chunks
        )));
    }
    Ok(())
}

/// Where to send bytes for one part
#[utoipa::path(
    get,
    path = "/api/v1/uploads/{session_id}/parts/{part_number}/target",
    tag = "uploads",
    params(
        ("session_id" = Uuid, Path, description = "Upload session ID"),
        ("part_number" = i32, Path, description = "Part number (1-based)")
    ),
    responses(
        (status = 200, description = "Upload target for the part", body = PartTargetResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn part_target(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path((session_id, part_number)): Path<(Uuid, i32)>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, &owner, session_id).await?;
    check_part_number(&session, part_number)?;

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;
    let target = backend
        .part_target(
            &session.storage_key,
            &session.backend_upload_id,
            part_number,
            state.limits.presigned_url_ttl,
        )
        .await
        .map_err(HttpAppError::from)?;

    let response = match target {
        PartTarget::Direct => PartTargetResponse::Direct,
        PartTarget::Presigned { url, expires_in } => PartTargetResponse::Presigned {
            url,
            expires_at: Utc::now()
                + chrono::Duration::from_std(expires_in)
                    .unwrap_or_else(|_| chrono::Duration::seconds(900)),
        },
    };

    Ok(Json(response))
}

/// Accept raw bytes for one part
#[utoipa::path(
    put,
    path = "/api/v1/uploads/{session_id}/parts/{part_number}",
    tag = "uploads",
    params(
        ("session_id" = Uuid, Path, description = "Upload session ID"),
        ("part_number" = i32, Path, description = "Part number (1-based)")
    ),
    request_body(content = [u8], description = "Raw part bytes", content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Part acknowledged", body = ReceivePartResponse),
        (status = 400, description = "Invalid part", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, body), fields(owner_id = %owner.user.id))]
pub async fn receive_part(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path((session_id, part_number)): Path<(Uuid, i32)>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, &owner, session_id).await?;
    check_part_number(&session, part_number)?;

    match session.status() {
        SessionStatus::Initiated | SessionStatus::Receiving => {}
        status => {
            return Err(HttpAppError::from(AppError::Conflict(format!(
                "Session is {} and no longer accepts parts",
                status
            ))));
        }
    }

    let expected = expected_part_size(&session, part_number);
    if body.len() as u64 != expected {
        return Err(HttpAppError::from(AppError::InvalidInput(format!(
            "Part {} must be {} bytes, got {}",
            part_number,
            expected,
            body.len()
        ))));
    }

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;
    let received_bytes = body.len() as u64;
    let part_id = backend
        .acknowledge_part(
            &session.storage_key,
            &session.backend_upload_id,
            part_number,
            body,
        )
        .await
        .map_err(HttpAppError::from)?;

    // Upsert: re-uploading a part number replaces its identifier, which is
    // what makes client-side part retry safe.
    state
        .db
        .sessions
        .record_part(session_id, part_number, &part_id, received_bytes as i64)
        .await?;

    tracing::info!(
        session_id = %session_id,
        part_number = part_number,
        size_bytes = received_bytes,
        "Part acknowledged"
    );

    Ok(Json(ReceivePartResponse {
        part_number,
        part_id,
        received_bytes,
    }))
}

/// Upload progress
#[utoipa::path(
    get,
    path = "/api/v1/uploads/{session_id}/progress",
    tag = "uploads",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Progress snapshot", body = UploadProgressResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn upload_progress(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, &owner, session_id).await?;
    let (part_count, byte_total) = state.db.sessions.part_stats(session_id).await?;

    Ok(Json(UploadProgressResponse {
        session_id,
        received_parts: part_count as i32,
        total_chunks: session.total_chunks,
        received_bytes: byte_total as u64,
        total_size: session.total_size as u64,
        status: session.status(),
    }))
}

/// Complete a chunked upload
#[utoipa::path(
    post,
    path = "/api/v1/uploads/{session_id}/complete",
    tag = "uploads",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "Upload registered", body = UploadedFileResponse),
        (status = 400, description = "Part list incomplete or mismatched", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(owner_id = %owner.user.id))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(session_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<CompleteUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, &owner, session_id).await?;

    match session.status() {
        SessionStatus::Initiated | SessionStatus::Receiving => {}
        status => {
            return Err(HttpAppError::from(AppError::Conflict(format!(
                "Session is {} and cannot be completed",
                status
            ))));
        }
    }

    if request.parts.len() != session.total_chunks as usize {
        return Err(HttpAppError::from(AppError::InvalidInput(format!(
            "Not all parts uploaded: {}/{} parts supplied",
            request.parts.len(),
            session.total_chunks
        ))));
    }

    // The supplied list must be parts 1..=n in order, matching the latest
    // recorded identifiers.
    let recorded: HashMap<i32, String> = state
        .db
        .sessions
        .get_parts(session_id)
        .await?
        .into_iter()
        .map(|p| (p.part_number, p.part_id))
        .collect();

    let mut completed = Vec::with_capacity(request.parts.len());
    for (idx, part) in request.parts.iter().enumerate() {
        let expected_number = idx as i32 + 1;
        if part.part_number != expected_number {
            return Err(HttpAppError::from(AppError::InvalidInput(format!(
                "Parts must be sorted by part number: expected {} at position {}, got {}",
                expected_number, idx, part.part_number
            ))));
        }
        match recorded.get(&part.part_number) {
            Some(recorded_id) if *recorded_id == part.part_id => {}
            Some(_) => {
                return Err(HttpAppError::from(AppError::InvalidInput(format!(
                    "Identifier mismatch for part {}",
                    part.part_number
                ))));
            }
            None => {
                return Err(HttpAppError::from(AppError::InvalidInput(format!(
                    "Part {} was never uploaded",
                    part.part_number
                ))));
            }
        }
        completed.push(CompletedPart {
            part_number: part.part_number,
            part_id: part.part_id.clone(),
        });
    }

    state
        .db
        .sessions
        .set_status(session_id, SessionStatus::Completing)
        .await?;

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;
    if let Err(e) = backend
        .complete_multipart(&session.storage_key, &session.backend_upload_id, &completed)
        .await
    {
        // The session stays retryable; the client can re-send missing parts
        // and complete again.
        state
            .db
            .sessions
            .set_status(session_id, SessionStatus::Receiving)
            .await?;
        return Err(HttpAppError::from(e));
    }

    let new_file = NewFile {
        owner_id: session.owner_id,
        display_name: session.display_name.clone(),
        storage_key: session.storage_key.clone(),
        url_path: session.url_path.clone(),
        content_type: session.content_type.clone(),
        size_bytes: session.total_size,
        visibility: session.visibility,
        password_hash: session.password_hash.clone(),
    };

    let record = match state
        .db
        .files
        .try_create_consuming_session(new_file, session_id)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            state
                .db
                .sessions
                .set_status(session_id, SessionStatus::Receiving)
                .await?;
            return Err(HttpAppError::from(e));
        }
    };

    notify_extraction(&state, &record);

    tracing::info!(
        session_id = %session_id,
        file_id = %record.id,
        size_bytes = record.size_bytes,
        "Chunked upload completed"
    );

    Ok(Json(UploadedFileResponse {
        id: record.id,
        url: format!("/f/{}", record.url_path),
        name: record.display_name,
        size: record.size_bytes,
        content_type: record.content_type,
        uploaded_at: record.uploaded_at,
    }))
}

/// Abort an in-flight upload, releasing backend staging resources.
#[utoipa::path(
    delete,
    path = "/api/v1/uploads/{session_id}",
    tag = "uploads",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 204, description = "Session aborted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session = owned_session(&state, &owner, session_id).await?;

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;
    if let Err(e) = backend
        .abort_multipart(&session.storage_key, &session.backend_upload_id)
        .await
    {
        tracing::warn!(
            error = %e,
            session_id = %session_id,
            "Failed to abort backend multipart upload"
        );
    }

    state.db.sessions.delete(session_id).await?;

    tracing::info!(session_id = %session_id, "Upload session aborted");

    Ok(StatusCode::NO_CONTENT)
}

/// Fire-and-forget extraction for eligible files; never fails the upload.
pub(crate) fn notify_extraction(state: &Arc<AppState>, record: &FileRecord) {
    if !is_extraction_eligible(&record.content_type) {
        return;
    }
    state.extraction.submit(ExtractionJob {
        file_id: record.id,
        storage_key: record.storage_key.clone(),
        content_type: record.content_type.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skiff_core::models::Visibility;

    fn session(total_size: i64, chunk_size: i64, total_chunks: i32) -> UploadSessionRow {
        UploadSessionRow {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            display_name: "big.bin".to_string(),
            storage_key: "files/o/big.bin".to_string(),
            url_path: "big.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            total_size,
            chunk_size,
            total_chunks,
            backend_upload_id: "upload-1".to_string(),
            visibility: Visibility::Private,
            password_hash: None,
            status: "receiving".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn twelve_mib_file_splits_into_5_5_2() {
        let mib = 1024 * 1024;
        let session = session(12 * mib, 5 * mib, 3);
        assert_eq!(expected_part_size(&session, 1), 5 * mib as u64);
        assert_eq!(expected_part_size(&session, 2), 5 * mib as u64);
        assert_eq!(expected_part_size(&session, 3), 2 * mib as u64);
    }

    #[test]
    fn exact_multiple_has_full_final_part() {
        let session = session(10 * 1024, 5 * 1024, 2);
        assert_eq!(expected_part_size(&session, 2), 5 * 1024);
    }

    #[test]
    fn part_number_bounds_are_enforced() {
        let session = session(100, 50, 2);
        assert!(check_part_number(&session, 0).is_err());
        assert!(check_part_number(&session, 1).is_ok());
        assert!(check_part_number(&session, 2).is_ok());
        assert!(check_part_number(&session, 3).is_err());
    }
}
