use chrono::Utc;
use skiff_core::models::{FileRecord, Visibility};
use skiff_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const FILE_COLUMNS: &str = r#"
    id, owner_id, display_name, storage_key, url_path, content_type,
    size_bytes, visibility, password_hash, download_count, uploaded_at,
    extracted, extracted_text, extraction_confidence
"#;

/// New file record input; the repository assigns the id and timestamp.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner_id: Uuid,
    pub display_name: String,
    pub storage_key: String,
    pub url_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub visibility: Visibility,
    pub password_hash: Option<String>,
}

/// Repository for durable file records.
///
/// Creating a record and charging the owner's quota happen in one
/// transaction; deleting and refunding likewise. No partial state (record
/// without counter update, or vice versa) is ever observable.
#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditional insert keyed on the unique url_path / (owner, storage_key)
    /// constraints. A collision surfaces as `AppError::Conflict` so the
    /// caller can retry with the next key candidate.
    pub async fn try_create(&self, new_file: NewFile) -> Result<FileRecord, AppError> {
        let id = Uuid::new_v4();
        let uploaded_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (
                id, owner_id, display_name, storage_key, url_path,
                content_type, size_bytes, visibility, password_hash, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_file.owner_id)
        .bind(&new_file.display_name)
        .bind(&new_file.storage_key)
        .bind(&new_file.url_path)
        .bind(&new_file.content_type)
        .bind(new_file.size_bytes)
        .bind(new_file.visibility)
        .bind(&new_file.password_hash)
        .bind(uploaded_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| super::map_insert_error(e, "storage path already in use"))?;

        sqlx::query(
            r#"
            UPDATE users
            SET storage_used_bytes = storage_used_bytes + $2
            WHERE id = $1
            "#,
        )
        .bind(new_file.owner_id)
        .bind(new_file.size_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            file_id = %record.id,
            owner_id = %record.owner_id,
            storage_key = %record.storage_key,
            size_bytes = record.size_bytes,
            "File record created"
        );

        Ok(record)
    }

    /// Completion-path insert: creates the record, charges the owner's
    /// quota, and deletes the upload session in one transaction, so a
    /// finished upload is registered exactly once and the session cannot be
    /// completed twice.
    pub async fn try_create_consuming_session(
        &self,
        new_file: NewFile,
        session_id: Uuid,
    ) -> Result<FileRecord, AppError> {
        let id = Uuid::new_v4();
        let uploaded_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (
                id, owner_id, display_name, storage_key, url_path,
                content_type, size_bytes, visibility, password_hash, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_file.owner_id)
        .bind(&new_file.display_name)
        .bind(&new_file.storage_key)
        .bind(&new_file.url_path)
        .bind(&new_file.content_type)
        .bind(new_file.size_bytes)
        .bind(new_file.visibility)
        .bind(&new_file.password_hash)
        .bind(uploaded_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| super::map_insert_error(e, "storage path already in use"))?;

        sqlx::query(
            r#"
            UPDATE users
            SET storage_used_bytes = storage_used_bytes + $2
            WHERE id = $1
            "#,
        )
        .bind(new_file.owner_id)
        .bind(new_file.size_bytes)
        .execute(&mut *tx)
        .await?;

        super::sessions::UploadSessionRepository::delete_in_tx(&mut tx, session_id).await?;

        tx.commit().await?;

        tracing::info!(
            file_id = %record.id,
            owner_id = %record.owner_id,
            session_id = %session_id,
            size_bytes = record.size_bytes,
            "Chunked upload registered as file record"
        );

        Ok(record)
    }

    /// Delete a record and refund the owner's quota in one transaction.
    /// Returns the deleted record so the caller can clean up storage.
    pub async fn delete(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<FileRecord>, AppError> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            DELETE FROM files
            WHERE id = $1 AND owner_id = $2
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = record else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE users
            SET storage_used_bytes = GREATEST(storage_used_bytes - $2, 0)
            WHERE id = $1
            "#,
        )
        .bind(owner_id)
        .bind(record.size_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            file_id = %record.id,
            owner_id = %owner_id,
            size_bytes = record.size_bytes,
            "File record deleted"
        );

        Ok(Some(record))
    }

    pub async fn get(&self, file_id: Uuid) -> Result<Option<FileRecord>, AppError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files WHERE id = $1
            "#
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_url_path(&self, url_path: &str) -> Result<Option<FileRecord>, AppError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files WHERE url_path = $1
            "#
        ))
        .bind(url_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileRecord>, AppError> {
        let records = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            SELECT {FILE_COLUMNS} FROM files
            WHERE owner_id = $1
            ORDER BY uploaded_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn update_access(
        &self,
        owner_id: Uuid,
        file_id: Uuid,
        visibility: Option<Visibility>,
        password_hash: Option<Option<String>>,
    ) -> Result<Option<FileRecord>, AppError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            UPDATE files
            SET visibility = COALESCE($3, visibility),
                password_hash = CASE WHEN $4 THEN $5 ELSE password_hash END
            WHERE id = $1 AND owner_id = $2
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(file_id)
        .bind(owner_id)
        .bind(visibility)
        .bind(password_hash.is_some())
        .bind(password_hash.flatten())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn increment_download_count(&self, file_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE files SET download_count = download_count + 1 WHERE id = $1
            "#,
        )
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Backfill the extraction result. Also called with an empty outcome on
    /// extraction failure so the file is not retried indefinitely.
    pub async fn mark_extracted(
        &self,
        file_id: Uuid,
        text: Option<String>,
        confidence: Option<f64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE files
            SET extracted = TRUE, extracted_text = $2, extraction_confidence = $3
            WHERE id = $1
            "#,
        )
        .bind(file_id)
        .bind(text)
        .bind(confidence)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sum of sizes of the owner's records; equals the quota counter at all
    /// times. Used by consistency checks and tests.
    pub async fn total_size_for_owner(&self, owner_id: Uuid) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(size_bytes), 0)::BIGINT AS total
            FROM files WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }
}
