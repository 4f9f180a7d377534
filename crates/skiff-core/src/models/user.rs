use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File owner with quota accounting.
///
/// `storage_used_bytes` is maintained transactionally alongside every file
/// record create/delete and always equals the sum of the owner's file sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub quota_bytes: i64,
    pub storage_used_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Quota headroom check used to admit or reject an upload before any
    /// storage write happens.
    pub fn can_store(&self, additional_bytes: i64) -> bool {
        self.storage_used_bytes.saturating_add(additional_bytes) <= self.quota_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(used: i64, quota: i64) -> User {
        User {
            id: Uuid::new_v4(),
            username: "uploader".to_string(),
            quota_bytes: quota,
            storage_used_bytes: used,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn can_store_respects_headroom() {
        // 9.9 GiB used of 10 GiB; a 200 MiB upload must be rejected
        let gib = 1024_i64 * 1024 * 1024;
        let mib = 1024_i64 * 1024;
        let u = user(99 * gib / 10, 10 * gib);
        assert!(!u.can_store(200 * mib));
        assert!(u.can_store(50 * mib));
    }

    #[test]
    fn can_store_handles_exact_fit() {
        let u = user(900, 1000);
        assert!(u.can_store(100));
        assert!(!u.can_store(101));
    }
}
