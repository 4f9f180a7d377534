//! Skiff database library
//!
//! Postgres repositories for owners, file records, and upload sessions.
//! All queries are dynamic (`sqlx::query`/`query_as`) so builds do not need a
//! live DATABASE_URL.

pub mod db;

pub use db::files::{FileRepository, NewFile};
pub use db::sessions::{
    NewUploadSession, SessionPartRow, UploadSessionRepository, UploadSessionRow,
};
pub use db::users::{api_key_digest, UserRepository};

/// Embedded migrations; run at startup via `MIGRATOR.run(&pool)`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
