//! `orders_sync_log` repository: records one row per sync attempt.

use chrono::NaiveDate;
use sqlx::PgPool;
use sync_types::{SyncError, SyncStatus};

use crate::db::map_db_error;

/// Insert a `running` row, with `attempt_no` one past the existing max for
/// this business key. Duplicate insert on the unique
/// `(pipeline_id, store_code, from_date, to_date, run_id)` key surfaces as
/// `KindConflict`, which callers treat as resumable.
pub async fn open_window(
    pool: &PgPool,
    pipeline_id: &str,
    store_code: &str,
    run_id: &str,
    run_env: &str,
    cost_center: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<i64, SyncError> {
    let attempt_no: (i32,) = sqlx::query_as(
        r#"
        SELECT COALESCE(MAX(attempt_no), 0) + 1
        FROM orders_sync_log
        WHERE pipeline_id = $1 AND store_code = $2 AND from_date = $3 AND to_date = $4
        "#,
    )
    .bind(pipeline_id)
    .bind(store_code)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
    .map_err(|e| map_db_error("failed to compute next attempt_no", e))?;

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO orders_sync_log
            (pipeline_id, store_code, cost_center, from_date, to_date, run_id, run_env,
             status, attempt_no, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'running', $8, now(), now())
        RETURNING id
        "#,
    )
    .bind(pipeline_id)
    .bind(store_code)
    .bind(cost_center)
    .bind(from)
    .bind(to)
    .bind(run_id)
    .bind(run_env)
    .bind(attempt_no.0)
    .fetch_one(pool)
    .await
    .map_err(|e| map_db_error("failed to open sync-log window", e))?;

    Ok(id)
}

pub async fn mark_orders_pulled(pool: &PgPool, id: i64) -> Result<(), SyncError> {
    sqlx::query("UPDATE orders_sync_log SET orders_pulled_at = now(), updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_db_error("failed to mark orders_pulled_at", e))?;
    Ok(())
}

pub async fn mark_sales_pulled(pool: &PgPool, id: i64) -> Result<(), SyncError> {
    sqlx::query("UPDATE orders_sync_log SET sales_pulled_at = now(), updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_db_error("failed to mark sales_pulled_at", e))?;
    Ok(())
}

/// Write the terminal status and optional error message for `id`.
pub async fn finalize(
    pool: &PgPool,
    id: i64,
    status: SyncStatus,
    error_message: Option<&str>,
) -> Result<(), SyncError> {
    let status_text = match status {
        SyncStatus::Running => "running",
        SyncStatus::Partial => "partial",
        SyncStatus::Success => "success",
        SyncStatus::Failed => "failed",
    };
    sqlx::query(
        "UPDATE orders_sync_log SET status = $1, error_message = $2, updated_at = now() WHERE id = $3",
    )
    .bind(status_text)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| map_db_error("failed to finalize sync-log row", e))?;
    Ok(())
}

/// All `success` windows recorded for `(pipeline_id, store_code)`, used by
/// the profiler to compute `last_success_to = max(to_date)`.
pub async fn successes_for(
    pool: &PgPool,
    pipeline_id: &str,
    store_code: &str,
) -> Result<Vec<(NaiveDate, NaiveDate)>, SyncError> {
    let rows: Vec<(NaiveDate, NaiveDate)> = sqlx::query_as(
        r#"
        SELECT from_date, to_date FROM orders_sync_log
        WHERE pipeline_id = $1 AND store_code = $2 AND status = 'success'
        ORDER BY to_date
        "#,
    )
    .bind(pipeline_id)
    .bind(store_code)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to query successes_for", e))?;
    Ok(rows)
}

/// Whether an exact `[from, to]` window already has a `success` row.
pub async fn is_covered(
    pool: &PgPool,
    pipeline_id: &str,
    store_code: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<bool, SyncError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM orders_sync_log
        WHERE pipeline_id = $1 AND store_code = $2
          AND from_date = $3 AND to_date = $4 AND status = 'success'
        "#,
    )
    .bind(pipeline_id)
    .bind(store_code)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
    .map_err(|e| map_db_error("failed to query is_covered", e))?;
    Ok(count > 0)
}

/// Ids of all `running` rows tied to `run_id`, used to finalize any window
/// execution that was aborted mid-flight by a cancellation grace-period
/// timeout as `failed` with message `"cancelled"`.
pub async fn running_for_run(pool: &PgPool, run_id: &str) -> Result<Vec<i64>, SyncError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM orders_sync_log WHERE run_id = $1 AND status = 'running'",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to query running rows for run", e))?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// A `running` row whose `updated_at` is older than `watchdog` is considered
/// orphaned, most often the result of a crashed or killed process. Returns
/// the stale row ids so the profiler can finalize them as `failed` before
/// planning new attempts.
pub async fn find_orphaned_running(
    pool: &PgPool,
    watchdog: std::time::Duration,
) -> Result<Vec<i64>, SyncError> {
    let watchdog_secs = watchdog.as_secs() as f64;
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM orders_sync_log
        WHERE status = 'running' AND updated_at < now() - make_interval(secs => $1)
        "#,
    )
    .bind(watchdog_secs)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to query orphaned running rows", e))?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
