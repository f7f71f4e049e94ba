//! Database advisory locks guarding per-(store, pipeline) exclusivity across
//! concurrent profiler processes.
//!
//! Generalizes the file-based mutual-exclusion idiom (acquire, hold for the
//! duration of a scoped guard, release on drop) to a Postgres session-level
//! advisory lock, since exclusivity here must hold across hosts sharing one
//! database rather than across processes sharing one filesystem.
//!
//! `pg_try_advisory_lock`/`pg_advisory_unlock` are scoped to the *physical*
//! connection that calls them, not to the pool. The guard below checks out
//! and pins a single [`sqlx::pool::PoolConnection`] for its entire lifetime
//! so the unlock always runs on the same backend that took the lock —
//! issuing it through a fresh pooled connection would silently no-op.

use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use sync_types::SyncError;

/// Deterministic 64-bit lock key for a `(store_code, pipeline_id)` pair. Two
/// distinct pairs may theoretically collide; an accidental false-exclusion
/// is an acceptable failure mode (the job is simply skipped and retried next
/// run), so a standard wyhash-style fold is sufficient.
pub fn lock_key(store_code: &str, pipeline_id: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    store_code.hash(&mut hasher);
    pipeline_id.hash(&mut hasher);
    hasher.finish() as i64
}

/// A held Postgres advisory lock, pinned to the connection that acquired it.
/// Releases on drop via `pg_advisory_unlock`, best-effort: a failed release
/// is logged, not propagated, since the connection closing would release it
/// anyway.
pub struct AdvisoryLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl AdvisoryLock {
    /// Attempt to acquire the lock for `(store_code, pipeline_id)` without
    /// blocking. Returns `Ok(None)` if another session holds it — the caller
    /// treats that as "another host is running it" and skips the job.
    pub async fn try_acquire(
        pool: &PgPool,
        store_code: &str,
        pipeline_id: &str,
    ) -> Result<Option<Self>, SyncError> {
        let key = lock_key(store_code, pipeline_id);
        let mut conn = pool.acquire().await.map_err(|e| {
            SyncError::with_source(
                sync_types::SyncErrorKind::Transport,
                format!("failed to check out a connection for {store_code}/{pipeline_id}'s advisory lock"),
                e,
            )
        })?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                SyncError::with_source(
                    sync_types::SyncErrorKind::Transport,
                    format!("advisory lock query failed for {store_code}/{pipeline_id}"),
                    e,
                )
            })?;

        if !acquired.0 {
            return Ok(None);
        }

        Ok(Some(Self { conn: Some(conn), key }))
    }

    /// Release the lock explicitly, surfacing any failure instead of
    /// swallowing it on drop. Callers that care about the unlock outcome
    /// (tests, graceful shutdown) should prefer this over letting the guard
    /// drop.
    pub async fn release(mut self) -> Result<(), SyncError> {
        let mut conn = self.conn.take().expect("release called twice");
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                SyncError::with_source(
                    sync_types::SyncErrorKind::Transport,
                    "advisory unlock failed",
                    e,
                )
            })?;
        Ok(())
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else { return };
        let key = self.key;
        tokio::spawn(async move {
            if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .execute(&mut *conn)
                .await
            {
                tracing::warn!(error = %e, key, "advisory unlock on drop failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_deterministic() {
        assert_eq!(lock_key("A668", "td_orders"), lock_key("A668", "td_orders"));
    }

    #[test]
    fn lock_key_distinguishes_pipeline_from_store() {
        assert_ne!(lock_key("A668", "td_orders"), lock_key("A668", "uc_gst"));
        assert_ne!(lock_key("A668", "td_orders"), lock_key("B001", "td_orders"));
    }
}
