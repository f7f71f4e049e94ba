//! Connection pool setup and migration bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sync_types::{SyncError, SyncErrorKind};

/// Open a bounded connection pool against `database_url`. Failure to connect
/// at all (bad DSN, unreachable host) is `KindFatalConfig` — there is no
/// useful degraded mode without a database.
pub async fn connect(database_url: &str) -> Result<PgPool, SyncError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| {
            SyncError::with_source(
                SyncErrorKind::FatalConfig,
                "failed to connect to the relational store",
                e,
            )
        })
}

/// Runs the embedded SQL migrations under `migrations/`. Migration
/// *authoring* happens in that directory; applying already-authored
/// migrations at startup is this crate's job.
pub async fn run_migrations(pool: &PgPool) -> Result<(), SyncError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| SyncError::with_source(SyncErrorKind::FatalConfig, "migration failed", e))
}

/// True when a database error is a unique-constraint violation (Postgres
/// SQLSTATE `23505`), the signal the sync-log and staging layers use to
/// detect a conflicting duplicate insert.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "23505")
}

/// Map a `sqlx::Error` to the taxonomy, collapsing unique-violations into
/// `KindConflict` and everything else into `KindTransport` (the only other
/// failure mode a running query can produce once connected).
pub fn map_db_error(context: &str, err: sqlx::Error) -> SyncError {
    if is_unique_violation(&err) {
        return SyncError::with_source(SyncErrorKind::Conflict, context, err);
    }
    SyncError::with_source(SyncErrorKind::Transport, context, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_error_is_not_a_unique_violation() {
        // sqlx::Error::PoolTimedOut has no associated database error code.
        let err = sqlx::Error::PoolTimedOut;
        assert!(!is_unique_violation(&err));
    }
}
