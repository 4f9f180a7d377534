pub mod files;
pub mod sessions;
pub mod users;

use skiff_core::AppError;

/// Maps a unique-constraint violation to a typed `Conflict` so callers can
/// retry with the next key candidate; everything else passes through.
pub(crate) fn map_insert_error(err: sqlx::Error, conflict_message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(conflict_message.to_string())
        }
        _ => AppError::from(err),
    }
}
