//! Abandoned-session reaper.
//!
//! A periodic sweep removes upload sessions past the TTL, aborting the
//! backend multipart upload first so staging resources are released. Reaped
//! sessions are gone from subsequent lookups and can no longer be completed.

use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;

pub fn spawn_session_reaper(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.session_reap_interval_secs.max(1));
    let ttl_hours = state.config.session_ttl_hours;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match reap_once(&state, ttl_hours).await {
                Ok(0) => {}
                Ok(reaped) => {
                    tracing::info!(reaped = reaped, "Reaped abandoned upload sessions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Session reaper sweep failed");
                }
            }
        }
    });

    tracing::info!(
        interval_secs = interval.as_secs(),
        ttl_hours = ttl_hours,
        "Session reaper started"
    );
}

pub async fn reap_once(state: &Arc<AppState>, ttl_hours: i64) -> anyhow::Result<u64> {
    let expired = state.db.sessions.list_expired(ttl_hours).await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let backend = state.storage.get_active().await?;
    let mut reaped = 0u64;

    for session in expired {
        if let Err(e) = backend
            .abort_multipart(&session.storage_key, &session.backend_upload_id)
            .await
        {
            tracing::warn!(
                error = %e,
                session_id = %session.id,
                "Failed to abort backend upload for expired session"
            );
        }
        state.db.sessions.delete(session.id).await?;
        reaped += 1;
    }

    Ok(reaped)
}
