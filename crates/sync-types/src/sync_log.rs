use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Terminal (or in-flight) status of a single sync-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Partial,
    Success,
    Failed,
}

/// One attempt to execute one window, keyed by
/// `(pipeline_id, store_code, from_date, to_date, run_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub pipeline_id: String,
    pub store_code: String,
    pub cost_center: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub run_id: String,
    pub run_env: String,
    pub status: SyncStatus,
    pub orders_pulled_at: Option<DateTime<Utc>>,
    pub sales_pulled_at: Option<DateTime<Utc>>,
    pub attempt_no: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncLogEntry {
    /// `status = success` implies, for TD pipelines, that both artifacts
    /// were pulled; for UC, only orders. `pipeline_id` values are the
    /// string pipeline identifiers used across the sync-log and
    /// run-summary tables (e.g. "td_orders", "uc_gst").
    pub fn satisfies_td_success_invariant(&self) -> bool {
        self.status != SyncStatus::Success
            || (self.orders_pulled_at.is_some() && self.sales_pulled_at.is_some())
    }

    pub fn satisfies_uc_success_invariant(&self) -> bool {
        self.status != SyncStatus::Success || self.orders_pulled_at.is_some()
    }
}

/// Overall status of a single profiler invocation, rolled up from the
/// window outcomes of every (store, pipeline) it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSummaryStatus {
    Running,
    Ok,
    Warning,
    Error,
    Partial,
}

impl RunSummaryStatus {
    /// The rollup rule for a run's overall status from its window outcomes:
    /// - all success => ok
    /// - any failed, no success => error
    /// - any partial (no failed) => partial
    /// - mixed success with >=1 failed => warning
    ///
    /// `outcomes` is empty only when a run planned and executed zero
    /// windows (e.g. every store was already fully synced); that maps to
    /// `Ok` since nothing failed.
    pub fn rollup(outcomes: &[SyncStatus]) -> Self {
        if outcomes.is_empty() {
            return RunSummaryStatus::Ok;
        }
        let has_failed = outcomes.iter().any(|s| *s == SyncStatus::Failed);
        let has_partial = outcomes.iter().any(|s| *s == SyncStatus::Partial);
        let has_success = outcomes.iter().any(|s| *s == SyncStatus::Success);

        match (has_failed, has_partial, has_success) {
            (false, false, _) => RunSummaryStatus::Ok,
            (true, _, false) => RunSummaryStatus::Error,
            (false, true, _) => RunSummaryStatus::Partial,
            (true, _, true) => RunSummaryStatus::Warning,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub pipeline_name: String,
    pub run_env: String,
    pub report_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_status: RunSummaryStatus,
    pub phases: serde_json::Value,
    pub metrics: serde_json::Value,
    pub summary_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_all_success_is_ok() {
        let v = vec![SyncStatus::Success, SyncStatus::Success];
        assert_eq!(RunSummaryStatus::rollup(&v), RunSummaryStatus::Ok);
    }

    #[test]
    fn rollup_only_failed_is_error() {
        let v = vec![SyncStatus::Failed, SyncStatus::Failed];
        assert_eq!(RunSummaryStatus::rollup(&v), RunSummaryStatus::Error);
    }

    #[test]
    fn rollup_partial_without_failed_is_partial() {
        let v = vec![SyncStatus::Success, SyncStatus::Partial];
        assert_eq!(RunSummaryStatus::rollup(&v), RunSummaryStatus::Partial);
    }

    #[test]
    fn rollup_mixed_success_and_failed_is_warning() {
        let v = vec![SyncStatus::Success, SyncStatus::Failed];
        assert_eq!(RunSummaryStatus::rollup(&v), RunSummaryStatus::Warning);
    }

    #[test]
    fn rollup_empty_is_ok() {
        assert_eq!(RunSummaryStatus::rollup(&[]), RunSummaryStatus::Ok);
    }

    proptest::proptest! {
        #[test]
        fn rollup_is_error_iff_no_success_and_some_failed(
            n_failed in 0usize..5, n_partial in 0usize..5, n_success in 0usize..5,
        ) {
            let mut v = Vec::new();
            v.extend(std::iter::repeat(SyncStatus::Failed).take(n_failed));
            v.extend(std::iter::repeat(SyncStatus::Partial).take(n_partial));
            v.extend(std::iter::repeat(SyncStatus::Success).take(n_success));
            if v.is_empty() {
                return Ok(());
            }
            let got = RunSummaryStatus::rollup(&v);
            let expect_error = n_failed > 0 && n_success == 0;
            prop_assert_eq!(got == RunSummaryStatus::Error, expect_error);
        }
    }
}
