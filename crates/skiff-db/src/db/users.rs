use sha2::{Digest, Sha256};
use skiff_core::models::User;
use skiff_core::AppError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Digest under which API keys are stored; the raw key never touches the
/// database.
pub fn api_key_digest(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Repository for file owners and their quota counters.
///
/// `storage_used_bytes` is read here but only ever written inside the file
/// repository's record transactions.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, quota_bytes, storage_used_bytes, created_at
            FROM users
            WHERE api_key_digest = $1
            "#,
        )
        .bind(api_key_digest(api_key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, quota_bytes, storage_used_bytes, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Create an owner; used by provisioning and test fixtures.
    pub async fn create_user(
        &self,
        username: &str,
        api_key: &str,
        quota_bytes: i64,
    ) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, api_key_digest, quota_bytes)
            VALUES ($1, $2, $3)
            RETURNING id, username, quota_bytes, storage_used_bytes, created_at
            "#,
        )
        .bind(username)
        .bind(api_key_digest(api_key))
        .bind(quota_bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| super::map_insert_error(e, "username already taken"))?;

        Ok(row)
    }

    pub async fn storage_used(&self, user_id: Uuid) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"
            SELECT storage_used_bytes FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("storage_used_bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_digest_is_stable_hex() {
        let digest = api_key_digest("sk-test-key");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, api_key_digest("sk-test-key"));
        assert_ne!(digest, api_key_digest("sk-other-key"));
    }
}
