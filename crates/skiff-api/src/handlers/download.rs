//! File retrieval with visibility/password gating and byte-range support.

use crate::auth::maybe_owner;
use crate::error::{ErrorResponse, HttpAppError};
use crate::http_range::{parse_range, ParsedRange};
use crate::passwords;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use skiff_core::models::{FileRecord, Visibility};
use skiff_core::AppError;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    password: Option<String>,
}

fn password_from_request(headers: &HeaderMap, query: &DownloadQuery) -> Option<String> {
    if let Some(value) = headers.get("x-file-password") {
        if let Ok(value) = value.to_str() {
            return Some(value.to_string());
        }
    }
    query.password.clone()
}

/// Visibility and password gates, applied before any storage access.
async fn check_access(
    state: &Arc<AppState>,
    record: &FileRecord,
    headers: &HeaderMap,
    query: &DownloadQuery,
) -> Result<(), AppError> {
    if record.visibility == Visibility::Private {
        let requester = maybe_owner(state, headers).await;
        // Private files are indistinguishable from missing ones for
        // everyone but their owner.
        if requester.map(|u| u.id) != Some(record.owner_id) {
            return Err(AppError::NotFound(format!(
                "File not found: {}",
                record.url_path
            )));
        }
    }

    if let Some(ref password_hash) = record.password_hash {
        let provided = password_from_request(headers, query)
            .ok_or_else(|| AppError::Unauthorized("Password required".to_string()))?;
        if !passwords::verify_password(&provided, password_hash) {
            return Err(AppError::Unauthorized("Invalid password".to_string()));
        }
    }

    Ok(())
}

fn content_disposition(record: &FileRecord) -> String {
    // Quotes and control characters have no place in a filename parameter.
    let safe: String = record
        .display_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    format!("inline; filename=\"{}\"", safe)
}

/// Retrieve a file by its shareable path.
///
/// Honors single-range `Range` requests with `206 Partial Content` and an
/// exact-length body; serves `200` with `Accept-Ranges: bytes` otherwise.
/// Public, unprotected files above the offload threshold are redirected to a
/// time-limited backend URL when the backend can serve them directly.
#[utoipa::path(
    get,
    path = "/f/{url_path}",
    tag = "files",
    params(
        ("url_path" = String, Path, description = "Shareable file path"),
        ("password" = Option<String>, Query, description = "Password for protected files")
    ),
    responses(
        (status = 200, description = "Full file body"),
        (status = 206, description = "Requested byte range"),
        (status = 302, description = "Redirect to a time-limited backend URL"),
        (status = 401, description = "Password required or wrong", body = ErrorResponse),
        (status = 404, description = "File not found", body = ErrorResponse),
        (status = 416, description = "Range not satisfiable")
    )
)]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(url_path): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let record = state
        .db
        .files
        .get_by_url_path(&url_path)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", url_path)))?;

    check_access(&state, &record, &headers, &query).await?;

    let size = record.size_bytes as u64;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    let parsed = match parse_range(range_header, size) {
        Ok(parsed) => parsed,
        Err(AppError::RangeNotSatisfiable { size }) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty())
                .map_err(|e| HttpAppError::from(AppError::Internal(e.to_string())));
        }
        Err(e) => return Err(HttpAppError::from(e)),
    };

    let backend = state.storage.get_active().await.map_err(HttpAppError::from)?;

    // Offload large public downloads so the bytes never transit this
    // process.
    if matches!(parsed, ParsedRange::Full)
        && record.visibility == Visibility::Public
        && record.password_hash.is_none()
        && backend.supports_presigned_transfer()
        && size > state.limits.direct_upload_threshold_bytes
    {
        let url = backend
            .retrieval_url(&record.storage_key, state.limits.presigned_url_ttl)
            .await
            .map_err(HttpAppError::from)?;
        state.db.files.increment_download_count(record.id).await?;
        return Ok(Redirect::temporary(&url).into_response());
    }

    let (status, range, count_download) = match parsed {
        ParsedRange::Full => (StatusCode::OK, None, true),
        ParsedRange::Partial(range) => (
            StatusCode::PARTIAL_CONTENT,
            Some(range),
            range.start == 0,
        ),
    };

    let stream = backend
        .open_stream(&record.storage_key, range)
        .await
        .map_err(HttpAppError::from)?;

    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    if count_download {
        state.db.files.increment_download_count(record.id).await?;
    }

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, record.content_type.clone())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_DISPOSITION, content_disposition(&record));

    builder = match range {
        Some(range) => builder
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, size),
            )
            .header(header::CONTENT_LENGTH, range.len()),
        None => builder.header(header::CONTENT_LENGTH, size),
    };

    builder
        .body(Body::from_stream(body_stream))
        .map_err(|e| HttpAppError::from(AppError::Internal(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(name: &str) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            display_name: name.to_string(),
            storage_key: "files/o/x".to_string(),
            url_path: "x".to_string(),
            content_type: "application/octet-stream".to_string(),
            size_bytes: 1,
            visibility: Visibility::Public,
            password_hash: None,
            download_count: 0,
            uploaded_at: Utc::now(),
            extracted: false,
            extracted_text: None,
            extraction_confidence: None,
        }
    }

    #[test]
    fn content_disposition_strips_quotes_and_controls() {
        let disposition = content_disposition(&record("weird\"name\n.pdf"));
        assert_eq!(disposition, "inline; filename=\"weirdname.pdf\"");
    }

    #[test]
    fn password_header_beats_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-file-password",
            axum::http::HeaderValue::from_static("from-header"),
        );
        let query = DownloadQuery {
            password: Some("from-query".to_string()),
        };
        assert_eq!(
            password_from_request(&headers, &query),
            Some("from-header".to_string())
        );

        let headers = HeaderMap::new();
        assert_eq!(
            password_from_request(&headers, &query),
            Some("from-query".to_string())
        );
    }
}
