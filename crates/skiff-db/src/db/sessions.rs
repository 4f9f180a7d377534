use chrono::{DateTime, Duration, Utc};
use skiff_core::models::{SessionStatus, Visibility};
use skiff_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// New upload session input; the caller supplies the id so it can be handed
/// to the storage backend before the row exists.
#[derive(Debug, Clone)]
pub struct NewUploadSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub storage_key: String,
    pub url_path: String,
    pub content_type: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i32,
    pub backend_upload_id: String,
    pub visibility: Visibility,
    pub password_hash: Option<String>,
}

/// Upload session record
#[derive(Debug)]
pub struct UploadSessionRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub storage_key: String,
    pub url_path: String,
    pub content_type: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i32,
    pub backend_upload_id: String,
    pub visibility: Visibility,
    pub password_hash: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSessionRow {
    pub fn status(&self) -> SessionStatus {
        self.status
            .parse()
            .unwrap_or(SessionStatus::Abandoned)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UploadSessionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UploadSessionRow {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            display_name: row.get("display_name"),
            storage_key: row.get("storage_key"),
            url_path: row.get("url_path"),
            content_type: row.get("content_type"),
            total_size: row.get("total_size"),
            chunk_size: row.get("chunk_size"),
            total_chunks: row.get("total_chunks"),
            backend_upload_id: row.get("backend_upload_id"),
            visibility: row.get("visibility"),
            password_hash: row.get("password_hash"),
            status: row.get("status"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// One acknowledged part
#[derive(Debug, sqlx::FromRow)]
pub struct SessionPartRow {
    pub session_id: Uuid,
    pub part_number: i32,
    pub part_id: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Repository for in-flight chunked upload sessions.
///
/// Sessions live in Postgres so every API instance sees the same state; part
/// acknowledgement is serialized by the upsert, not an in-process lock.
#[derive(Clone)]
pub struct UploadSessionRepository {
    pool: PgPool,
}

impl UploadSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditional insert; a concurrent upload holding the same storage key
    /// surfaces as `AppError::Conflict` so the caller can retry with the
    /// next candidate.
    pub async fn try_create(&self, session: NewUploadSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, owner_id, display_name, storage_key, url_path, content_type,
                total_size, chunk_size, total_chunks, backend_upload_id,
                visibility, password_hash, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'initiated')
            "#,
        )
        .bind(session.id)
        .bind(session.owner_id)
        .bind(&session.display_name)
        .bind(&session.storage_key)
        .bind(&session.url_path)
        .bind(&session.content_type)
        .bind(session.total_size)
        .bind(session.chunk_size)
        .bind(session.total_chunks)
        .bind(&session.backend_upload_id)
        .bind(session.visibility)
        .bind(&session.password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| super::map_insert_error(e, "storage key already reserved"))?;

        Ok(())
    }

    /// Fetch a session, enforcing ownership.
    pub async fn get(
        &self,
        owner_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<UploadSessionRow>, AppError> {
        let row = sqlx::query_as::<_, UploadSessionRow>(
            r#"
            SELECT * FROM upload_sessions
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(session_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Record one acknowledged part. The upsert makes part retry idempotent:
    /// re-uploading a part number replaces its identifier atomically, also
    /// across API instances. Moves a fresh session into `receiving`.
    pub async fn record_part(
        &self,
        session_id: Uuid,
        part_number: i32,
        part_id: &str,
        size_bytes: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_session_parts (session_id, part_number, part_id, size_bytes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, part_number)
            DO UPDATE SET part_id = EXCLUDED.part_id,
                          size_bytes = EXCLUDED.size_bytes,
                          uploaded_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(part_number)
        .bind(part_id)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'receiving', updated_at = NOW()
            WHERE id = $1 AND status = 'initiated'
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_parts(&self, session_id: Uuid) -> Result<Vec<SessionPartRow>, AppError> {
        let parts = sqlx::query_as::<_, SessionPartRow>(
            r#"
            SELECT session_id, part_number, part_id, size_bytes, uploaded_at
            FROM upload_session_parts
            WHERE session_id = $1
            ORDER BY part_number
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(parts)
    }

    /// Count and byte total of acknowledged parts.
    pub async fn part_stats(&self, session_id: Uuid) -> Result<(i64, i64), AppError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS part_count,
                   COALESCE(SUM(size_bytes), 0)::BIGINT AS byte_total
            FROM upload_session_parts
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.get("part_count"), row.get("byte_total")))
    }

    pub async fn set_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM upload_sessions WHERE id = $1
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete the session inside an existing transaction; used by the
    /// completion path so session removal commits together with the file
    /// record and quota update.
    pub async fn delete_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            DELETE FROM upload_sessions WHERE id = $1
            "#,
        )
        .bind(session_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Whether an in-flight session has reserved this shareable path.
    pub async fn url_path_in_use(&self, url_path: &str) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(SELECT 1 FROM upload_sessions WHERE url_path = $1) AS used
            "#,
        )
        .bind(url_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("used"))
    }

    /// Sessions older than `ttl_hours`, due for the reaper.
    pub async fn list_expired(&self, ttl_hours: i64) -> Result<Vec<UploadSessionRow>, AppError> {
        let cutoff = Utc::now() - Duration::hours(ttl_hours);

        let rows = sqlx::query_as::<_, UploadSessionRow>(
            r#"
            SELECT * FROM upload_sessions
            WHERE created_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
