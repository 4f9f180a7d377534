use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Visibility;

/// Upload session lifecycle.
///
/// `initiated → receiving → completing → complete`; `abandoned` is reached
/// from `initiated`/`receiving` via the 24-hour reaper. `complete` sessions
/// are deleted in the same transaction that creates the file record, so the
/// terminal state is never observable through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initiated,
    Receiving,
    Completing,
    Complete,
    Abandoned,
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiated" => Ok(SessionStatus::Initiated),
            "receiving" => Ok(SessionStatus::Receiving),
            "completing" => Ok(SessionStatus::Completing),
            "complete" => Ok(SessionStatus::Complete),
            "abandoned" => Ok(SessionStatus::Abandoned),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SessionStatus::Initiated => write!(f, "initiated"),
            SessionStatus::Receiving => write!(f, "receiving"),
            SessionStatus::Completing => write!(f, "completing"),
            SessionStatus::Complete => write!(f, "complete"),
            SessionStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Request to start a chunked upload session
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
pub struct StartUploadRequest {
    /// Original filename
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Content type (MIME type)
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: String,
    /// Total file size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub total_size: u64,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    /// Optional password gate for the shared link
    pub password: Option<String>,
    /// Generate an opaque random URL instead of a filename-derived one
    #[serde(default)]
    pub random_url: bool,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

/// Response for starting a chunked upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartUploadResponse {
    /// Upload session ID
    pub session_id: Uuid,
    /// Storage key reserved for this upload
    pub storage_key: String,
    /// Fixed chunk size in bytes; every part except the last must be exactly
    /// this size
    pub chunk_size: u64,
    /// Total number of parts the server expects
    pub total_chunks: i32,
}

/// Where the client should send bytes for one part.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum PartTargetResponse {
    /// Upload through the part-upload endpoint
    Direct,
    /// Upload straight to the backing store
    Presigned {
        url: String,
        expires_at: DateTime<Utc>,
    },
}

/// Response after a part upload is acknowledged
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReceivePartResponse {
    /// Part number (1-based)
    pub part_number: i32,
    /// Opaque part identifier required for completion
    pub part_id: String,
    pub received_bytes: u64,
}

/// Upload progress snapshot
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadProgressResponse {
    pub session_id: Uuid,
    pub received_parts: i32,
    pub total_chunks: i32,
    pub received_bytes: u64,
    pub total_size: u64,
    pub status: SessionStatus,
}

/// One entry of the ordered part list supplied at completion
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletePart {
    /// Part number (1-based)
    pub part_number: i32,
    /// Identifier returned when the part was acknowledged
    pub part_id: String,
}

/// Request to complete a chunked upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CompleteUploadRequest {
    pub parts: Vec<CompletePart>,
}

/// Response after an upload (direct or chunked) produced a file record
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadedFileResponse {
    pub id: Uuid,
    /// Shareable URL path
    pub url: String,
    /// Original filename
    pub name: String,
    pub size: i64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_round_trips() {
        for status in [
            SessionStatus::Initiated,
            SessionStatus::Receiving,
            SessionStatus::Completing,
            SessionStatus::Complete,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn start_request_validates_bounds() {
        let request = StartUploadRequest {
            filename: "".to_string(),
            content_type: "application/pdf".to_string(),
            total_size: 0,
            visibility: Visibility::Private,
            password: None,
            random_url: false,
        };
        assert!(request.validate().is_err());

        let request = StartUploadRequest {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            total_size: 1,
            visibility: Visibility::Private,
            password: None,
            random_url: false,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn part_target_serializes_with_tag() {
        let direct = serde_json::to_value(PartTargetResponse::Direct).unwrap();
        assert_eq!(direct["target"], "direct");

        let presigned = serde_json::to_value(PartTargetResponse::Presigned {
            url: "https://example/part".to_string(),
            expires_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(presigned["target"], "presigned");
        assert!(presigned["url"].is_string());
    }
}
