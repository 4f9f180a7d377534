//! Repository integration tests.
//!
//! These run against a live Postgres pointed to by SKIFF_TEST_DATABASE_URL
//! and are skipped silently when it is not set. Migrations are applied on
//! first connect; tests use per-run unique names so they can share a
//! database.

use skiff_core::models::{SessionStatus, Visibility};
use skiff_core::AppError;
use skiff_db::{
    FileRepository, NewFile, NewUploadSession, UploadSessionRepository, UserRepository,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("SKIFF_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .ok()?;
    skiff_db::MIGRATOR.run(&pool).await.ok()?;
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

fn new_file(owner_id: Uuid, url_path: &str, size: i64) -> NewFile {
    NewFile {
        owner_id,
        display_name: format!("{}.bin", url_path),
        storage_key: format!("files/{}/{}", owner_id, url_path),
        url_path: url_path.to_string(),
        content_type: "application/octet-stream".to_string(),
        size_bytes: size,
        visibility: Visibility::Private,
        password_hash: None,
    }
}

#[tokio::test]
async fn quota_counter_tracks_creates_and_deletes() {
    let Some(pool) = test_pool().await else {
        eprintln!("SKIFF_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let users = UserRepository::new(pool.clone());
    let files = FileRepository::new(pool.clone());

    let user = users
        .create_user(&unique("quota-user"), &unique("key"), 10_000)
        .await
        .unwrap();

    let a = files
        .try_create(new_file(user.id, &unique("quota-a"), 1_000))
        .await
        .unwrap();
    let b = files
        .try_create(new_file(user.id, &unique("quota-b"), 2_500))
        .await
        .unwrap();

    assert_eq!(users.storage_used(user.id).await.unwrap(), 3_500);
    assert_eq!(files.total_size_for_owner(user.id).await.unwrap(), 3_500);

    files.delete(user.id, a.id).await.unwrap().unwrap();
    assert_eq!(users.storage_used(user.id).await.unwrap(), 2_500);
    assert_eq!(files.total_size_for_owner(user.id).await.unwrap(), 2_500);

    files.delete(user.id, b.id).await.unwrap().unwrap();
    assert_eq!(users.storage_used(user.id).await.unwrap(), 0);

    // Deleting an already-deleted record is a no-op with no counter drift.
    assert!(files.delete(user.id, b.id).await.unwrap().is_none());
    assert_eq!(users.storage_used(user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_url_path_surfaces_as_conflict() {
    let Some(pool) = test_pool().await else {
        eprintln!("SKIFF_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let users = UserRepository::new(pool.clone());
    let files = FileRepository::new(pool.clone());

    let owner_a = users
        .create_user(&unique("conflict-a"), &unique("key"), 10_000)
        .await
        .unwrap();
    let owner_b = users
        .create_user(&unique("conflict-b"), &unique("key"), 10_000)
        .await
        .unwrap();

    let path = unique("test-pdf");
    files.try_create(new_file(owner_a.id, &path, 10)).await.unwrap();

    // Same shareable path, even from another owner, is a typed conflict.
    let err = files
        .try_create(new_file(owner_b.id, &path, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The conflicting insert charged nothing.
    assert_eq!(users.storage_used(owner_b.id).await.unwrap(), 0);

    // The next candidate goes through.
    files
        .try_create(new_file(owner_b.id, &format!("{}-1", path), 10))
        .await
        .unwrap();
}

fn new_session(owner_id: Uuid, url_path: &str) -> NewUploadSession {
    NewUploadSession {
        id: Uuid::new_v4(),
        owner_id,
        display_name: format!("{}.bin", url_path),
        storage_key: format!("files/{}/{}", owner_id, url_path),
        url_path: url_path.to_string(),
        content_type: "application/octet-stream".to_string(),
        total_size: 1_500,
        chunk_size: 1_000,
        total_chunks: 2,
        backend_upload_id: unique("upload"),
        visibility: Visibility::Private,
        password_hash: None,
    }
}

#[tokio::test]
async fn part_upsert_is_idempotent_and_replaces_identifier() {
    let Some(pool) = test_pool().await else {
        eprintln!("SKIFF_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let users = UserRepository::new(pool.clone());
    let sessions = UploadSessionRepository::new(pool.clone());

    let user = users
        .create_user(&unique("parts-user"), &unique("key"), 10_000)
        .await
        .unwrap();
    let session = new_session(user.id, &unique("parts"));
    let session_id = session.id;
    sessions.try_create(session).await.unwrap();

    sessions.record_part(session_id, 1, "etag-draft", 1_000).await.unwrap();
    sessions.record_part(session_id, 2, "etag-two", 500).await.unwrap();
    // Retry of part 1 replaces only part 1.
    sessions.record_part(session_id, 1, "etag-final", 1_000).await.unwrap();

    let parts = sessions.get_parts(session_id).await.unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].part_number, 1);
    assert_eq!(parts[0].part_id, "etag-final");
    assert_eq!(parts[1].part_id, "etag-two");

    let (count, bytes) = sessions.part_stats(session_id).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(bytes, 1_500);

    // First part moved the session out of `initiated`.
    let row = sessions.get(user.id, session_id).await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::Receiving);
}

#[tokio::test]
async fn expired_sessions_are_listed_for_the_reaper() {
    let Some(pool) = test_pool().await else {
        eprintln!("SKIFF_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let users = UserRepository::new(pool.clone());
    let sessions = UploadSessionRepository::new(pool.clone());

    let user = users
        .create_user(&unique("reap-user"), &unique("key"), 10_000)
        .await
        .unwrap();

    let fresh = new_session(user.id, &unique("fresh"));
    let fresh_id = fresh.id;
    sessions.try_create(fresh).await.unwrap();

    let stale = new_session(user.id, &unique("stale"));
    let stale_id = stale.id;
    sessions.try_create(stale).await.unwrap();
    sqlx::query("UPDATE upload_sessions SET created_at = NOW() - INTERVAL '25 hours' WHERE id = $1")
        .bind(stale_id)
        .execute(&pool)
        .await
        .unwrap();

    let expired = sessions.list_expired(24).await.unwrap();
    let expired_ids: Vec<Uuid> = expired.iter().map(|s| s.id).collect();
    assert!(expired_ids.contains(&stale_id));
    assert!(!expired_ids.contains(&fresh_id));

    // Once reaped, the session is gone from lookups and not completable.
    sessions.delete(stale_id).await.unwrap();
    assert!(sessions.get(user.id, stale_id).await.unwrap().is_none());
}
