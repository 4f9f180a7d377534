use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// File visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "file_visibility", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(anyhow::anyhow!("Invalid visibility: {}", s)),
        }
    }
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Durable file record.
///
/// `url_path` is globally unique; `storage_key` is unique within the owner's
/// namespace. Created and deleted only inside the same transaction that
/// adjusts the owner's storage-usage counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FileRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Original filename, unmodified; used for presentation and headers only.
    pub display_name: String,
    pub storage_key: String,
    pub url_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub visibility: Visibility,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub download_count: i64,
    pub uploaded_at: DateTime<Utc>,
    /// Text extraction bookkeeping: set once the background extractor has run,
    /// even when it failed (empty result), so files are not retried forever.
    pub extracted: bool,
    pub extracted_text: Option<String>,
    pub extraction_confidence: Option<f64>,
}

impl FileRecord {
    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Public view of a file record.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    pub id: Uuid,
    /// Original filename as supplied by the uploader.
    pub name: String,
    /// Shareable URL path.
    pub url: String,
    pub size: i64,
    pub content_type: String,
    pub visibility: Visibility,
    pub password_protected: bool,
    pub download_count: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileResponse {
    fn from(record: &FileRecord) -> Self {
        FileResponse {
            id: record.id,
            name: record.display_name.clone(),
            url: format!("/f/{}", record.url_path),
            size: record.size_bytes,
            content_type: record.content_type.clone(),
            visibility: record.visibility,
            password_protected: record.is_password_protected(),
            download_count: record.download_count,
            uploaded_at: record.uploaded_at,
        }
    }
}

/// Visibility/password update request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateFileRequest {
    pub visibility: Option<Visibility>,
    /// New password for the file; ignored when `clear_password` is set.
    pub password: Option<String>,
    /// Remove password protection.
    #[serde(default)]
    pub clear_password: bool,
}
