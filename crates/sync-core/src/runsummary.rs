//! `pipeline_run_summaries` repository: one row per invocation.

use chrono::NaiveDate;
use sqlx::PgPool;
use sync_types::{RunSummaryStatus, SyncError};

use crate::db::map_db_error;

/// Open a run, generating a unique `run_id` (a UUID v4, per the sync
/// scheduler's need for an identifier stable across every window and
/// document the run touches).
pub async fn open_run(
    pool: &PgPool,
    pipeline_name: &str,
    run_env: &str,
    report_date: NaiveDate,
) -> Result<String, SyncError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO pipeline_run_summaries
            (run_id, pipeline_name, run_env, report_date, started_at, overall_status)
        VALUES ($1, $2, $3, $4, now(), 'running')
        "#,
    )
    .bind(&run_id)
    .bind(pipeline_name)
    .bind(run_env)
    .bind(report_date)
    .execute(pool)
    .await
    .map_err(|e| map_db_error("failed to open run summary", e))?;
    Ok(run_id)
}

fn status_text(status: RunSummaryStatus) -> &'static str {
    match status {
        RunSummaryStatus::Running => "running",
        RunSummaryStatus::Ok => "ok",
        RunSummaryStatus::Warning => "warning",
        RunSummaryStatus::Error => "error",
        RunSummaryStatus::Partial => "partial",
    }
}

/// Finalize a run once, setting `finished_at` and the rolled-up overall
/// status and human-readable summary text.
pub async fn close_run(
    pool: &PgPool,
    run_id: &str,
    overall_status: RunSummaryStatus,
    summary_text: &str,
) -> Result<(), SyncError> {
    sqlx::query(
        r#"
        UPDATE pipeline_run_summaries
        SET finished_at = now(), overall_status = $1, summary_text = $2
        WHERE run_id = $3
        "#,
    )
    .bind(status_text(overall_status))
    .bind(summary_text)
    .bind(run_id)
    .execute(pool)
    .await
    .map_err(|e| map_db_error("failed to close run summary", e))?;
    Ok(())
}

/// Render the per-pipeline success/partial/failed counts line used both in
/// `summary_text` and the dispatcher email body.
pub fn render_summary_text(
    pipeline_name: &str,
    success: usize,
    partial: usize,
    failed: usize,
) -> String {
    format!("{pipeline_name}: {success} success, {partial} partial, {failed} failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_summary_text_lists_all_three_counts() {
        let text = render_summary_text("td_orders", 4, 1, 2);
        assert_eq!(text, "td_orders: 4 success, 1 partial, 2 failed");
    }

    #[test]
    fn status_text_matches_db_enum_values() {
        assert_eq!(status_text(RunSummaryStatus::Ok), "ok");
        assert_eq!(status_text(RunSummaryStatus::Warning), "warning");
        assert_eq!(status_text(RunSummaryStatus::Error), "error");
        assert_eq!(status_text(RunSummaryStatus::Partial), "partial");
    }
}
