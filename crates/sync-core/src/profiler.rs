//! Profiler / orchestrator.
//!
//! Given only the contents of `orders_sync_log`, decides for every
//! (store, pipeline) pair which windows to (re)run, then executes them with
//! bounded parallelism, store-level mutual exclusion, a database advisory
//! lock per (store, pipeline), halting on the first non-success outcome,
//! and cooperative cancellation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use sqlx::PgPool;
use sync_types::{RunSummaryStatus, Store, SyncError, SyncGroup, SyncStatus, Window};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::engine::{self, EngineContext, WindowOutcome};
use crate::lock::AdvisoryLock;
use crate::webauto::{ChromeAutomation, WebAutomation};
use crate::{clock, registry, runsummary, synclog};

/// How long the profiler waits for in-flight store jobs to wind down after
/// cancellation before abandoning them and finalizing their windows as
/// `cancelled`.
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Pure plan-construction function: given a store's recorded success
/// windows, its eligible start date, today, and the window/overlap sizing,
/// compute the ordered candidate windows for the backfill, appending a
/// today-refresh window if nothing in the plan already covers `today`.
pub fn plan_windows(
    successes: &[(NaiveDate, NaiveDate)],
    start_date: NaiveDate,
    today: NaiveDate,
    window_days: i64,
    overlap_days: i64,
) -> Vec<Window> {
    let last_success_to = successes.iter().map(|(_, to)| *to).max();
    let next_from = match last_success_to {
        None => start_date,
        Some(last_to) => {
            let overlap_start = last_to - chrono::Duration::days(overlap_days - 1);
            start_date.max(overlap_start)
        }
    };
    let mut windows = clock::chunks(next_from, today, window_days);
    if !windows.iter().any(|w| w.contains(today)) {
        windows.push(Window::single_day(today));
    }
    windows
}

/// The execution rule for a single candidate window: run if forced, if the
/// window overlaps the most recent `overlap_days` before
/// `last_success_to + 1`, or if no exact success row already covers it.
pub fn should_run(
    w: Window,
    force: bool,
    last_success_to: Option<NaiveDate>,
    overlap_days: i64,
    is_covered: bool,
) -> bool {
    if force {
        return true;
    }
    if let Some(last_to) = last_success_to {
        let overlap_start = last_to - chrono::Duration::days(overlap_days - 1);
        let (lo, hi) = if overlap_start <= last_to {
            (overlap_start, last_to)
        } else {
            (last_to, overlap_start)
        };
        if w.overlaps(&Window::new(lo, hi)) {
            return true;
        }
    }
    !is_covered
}

/// Everything the profiler needs beyond database connectivity: sizing
/// knobs, scope filters, and the per-store resources the engine needs.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub pipeline_name: String,
    pub run_env: String,
    pub window_days: i64,
    pub overlap_days: i64,
    pub max_workers: usize,
    pub force: bool,
    pub sync_group_filter: Option<SyncGroup>,
    pub store_code_filter: Option<String>,
    pub ingest_batch_size: usize,
    pub session_dir: PathBuf,
    pub download_dir: PathBuf,
    pub headless: bool,
    pub watchdog: Duration,
    pub tz: Tz,
}

/// Outcome of running every planned window for one (store, pipeline) pair.
#[derive(Debug)]
pub struct StorePipelineResult {
    pub store_code: String,
    pub pipeline_id: &'static str,
    pub outcomes: Vec<WindowOutcome>,
    pub halted: bool,
    pub skipped_lock: bool,
}

/// The profiler's final, rolled-up outcome for one invocation.
#[derive(Debug)]
pub struct ProfilerOutcome {
    pub run_id: String,
    pub overall_status: RunSummaryStatus,
    pub results: Vec<StorePipelineResult>,
}

fn counts(outcomes: &[SyncStatus]) -> (usize, usize, usize) {
    let success = outcomes.iter().filter(|s| **s == SyncStatus::Success).count();
    let partial = outcomes.iter().filter(|s| **s == SyncStatus::Partial).count();
    let failed = outcomes.iter().filter(|s| **s == SyncStatus::Failed).count();
    (success, partial, failed)
}

/// Build the closure the engine calls to get a fresh automation instance.
/// A new browser context is launched on every call — never reused across
/// window retries after a failure.
type AutomationFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Box<dyn WebAutomation>, SyncError>> + Send>>;

fn automation_factory(headless: bool, browser_download_dir: PathBuf) -> impl Fn() -> AutomationFuture + Clone {
    move || -> AutomationFuture {
        let browser_download_dir = browser_download_dir.clone();
        Box::pin(async move {
            let automation = ChromeAutomation::launch(headless, browser_download_dir).await?;
            Ok(Box::new(automation) as Box<dyn WebAutomation>)
        })
    }
}

/// Run the planned windows for one store, in ascending `from_date` order,
/// halting at the first non-success outcome.
async fn run_store_pipeline(
    pool: PgPool,
    run_id: String,
    store: Store,
    cfg: ProfilerConfig,
    cancel: CancellationToken,
    today: NaiveDate,
) -> StorePipelineResult {
    let pipeline_id = engine::pipeline_id_for(&store);

    let lock = match AdvisoryLock::try_acquire(&pool, &store.store_code, pipeline_id).await {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            tracing::info!(
                store = %store.store_code,
                pipeline_id,
                "advisory lock held by another host, skipping this run"
            );
            return StorePipelineResult {
                store_code: store.store_code,
                pipeline_id,
                outcomes: Vec::new(),
                halted: false,
                skipped_lock: true,
            };
        }
        Err(e) => {
            tracing::warn!(store = %store.store_code, error = %e, "failed to acquire advisory lock");
            return StorePipelineResult {
                store_code: store.store_code,
                pipeline_id,
                outcomes: Vec::new(),
                halted: false,
                skipped_lock: true,
            };
        }
    };

    let successes = match synclog::successes_for(&pool, pipeline_id, &store.store_code).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(store = %store.store_code, error = %e, "failed to load prior successes");
            let _ = lock.release().await;
            return StorePipelineResult {
                store_code: store.store_code,
                pipeline_id,
                outcomes: Vec::new(),
                halted: true,
                skipped_lock: false,
            };
        }
    };
    let last_success_to = successes.iter().map(|(_, to)| *to).max();
    let candidate_windows =
        plan_windows(&successes, store.start_date, today, cfg.window_days, cfg.overlap_days);

    let ctx = EngineContext {
        pool: &pool,
        session_dir: &cfg.session_dir,
        download_dir: &cfg.download_dir,
        run_id: &run_id,
        run_env: &cfg.run_env,
        ingest_batch_size: cfg.ingest_batch_size,
    };
    let make_automation = automation_factory(cfg.headless, cfg.download_dir.join("_browser_tmp"));

    let mut outcomes = Vec::new();
    let mut halted = false;

    for w in candidate_windows {
        if cancel.is_cancelled() {
            halted = true;
            break;
        }

        let is_covered = synclog::is_covered(&pool, pipeline_id, &store.store_code, w.from, w.to)
            .await
            .unwrap_or(false);
        if !should_run(w, cfg.force, last_success_to, cfg.overlap_days, is_covered) {
            continue;
        }

        let outcome_result = match store.sync_group {
            SyncGroup::Td => engine::run_td_window(&ctx, &store, w, make_automation.clone()).await,
            SyncGroup::Uc => engine::run_uc_window(&ctx, &store, w, make_automation.clone()).await,
        };

        match outcome_result {
            Ok(outcome) => {
                let status = outcome.status;
                outcomes.push(outcome);
                if status != SyncStatus::Success {
                    halted = true;
                    break;
                }
            }
            Err(e) => {
                tracing::error!(
                    store = %store.store_code,
                    window = %w,
                    error = %e,
                    "window execution returned an error outside the engine's own outcome handling"
                );
                halted = true;
                break;
            }
        }
    }

    if let Err(e) = lock.release().await {
        tracing::warn!(error = %e, "advisory lock release failed");
    }

    StorePipelineResult {
        store_code: store.store_code,
        pipeline_id,
        outcomes,
        halted,
        skipped_lock: false,
    }
}

/// The profiler/orchestrator: one instance per invocation of the sync
/// scheduler, driving every eligible store's window plan to completion (or
/// to cancellation).
pub struct Profiler {
    pool: PgPool,
    config: ProfilerConfig,
}

impl Profiler {
    pub fn new(pool: PgPool, config: ProfilerConfig) -> Self {
        Self { pool, config }
    }

    /// Run one full invocation: open the run summary, recover orphaned
    /// `running` rows, plan and execute windows for every eligible store
    /// with up to `max_workers` concurrent jobs, then close the run
    /// summary with the rolled-up status.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ProfilerOutcome, SyncError> {
        let today = clock::today(self.config.tz);
        let run_id =
            runsummary::open_run(&self.pool, &self.config.pipeline_name, &self.config.run_env, today)
                .await?;

        for id in synclog::find_orphaned_running(&self.pool, self.config.watchdog).await? {
            tracing::warn!(id, "finalizing orphaned running sync-log row");
            synclog::finalize(
                &self.pool,
                id,
                SyncStatus::Failed,
                Some("orphaned: exceeded running watchdog"),
            )
            .await?;
        }

        let stores = registry::eligible_stores(
            &self.pool,
            self.config.sync_group_filter,
            self.config.store_code_filter.as_deref(),
        )
        .await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut handles = Vec::new();
        for store in stores {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let pool = self.pool.clone();
            let run_id = run_id.clone();
            let cancel = cancel.clone();
            let cfg = self.config.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed early");
                run_store_pipeline(pool, run_id, store, cfg, cancel, today).await
            }));
        }

        let results = if cancel.is_cancelled() {
            self.await_with_grace(handles).await
        } else {
            let mut results = Vec::new();
            for h in handles {
                match h.await {
                    Ok(r) => results.push(r),
                    Err(e) => tracing::error!(error = %e, "store-pipeline task panicked"),
                }
            }
            results
        };

        if cancel.is_cancelled() {
            for id in synclog::running_for_run(&self.pool, &run_id).await.unwrap_or_default() {
                let _ = synclog::finalize(&self.pool, id, SyncStatus::Failed, Some("cancelled")).await;
            }
        }

        let all_outcomes: Vec<SyncStatus> =
            results.iter().flat_map(|r| r.outcomes.iter().map(|o| o.status)).collect();
        let overall_status = if cancel.is_cancelled() {
            if all_outcomes.iter().any(|s| *s == SyncStatus::Success) {
                RunSummaryStatus::Partial
            } else {
                RunSummaryStatus::Error
            }
        } else {
            RunSummaryStatus::rollup(&all_outcomes)
        };

        let (success, partial, failed) = counts(&all_outcomes);
        let summary_text =
            runsummary::render_summary_text(&self.config.pipeline_name, success, partial, failed);
        runsummary::close_run(&self.pool, &run_id, overall_status, &summary_text).await?;

        Ok(ProfilerOutcome { run_id, overall_status, results })
    }

    /// Await in-flight store jobs for up to [`CANCEL_GRACE`], aborting any
    /// that have not finished by the deadline.
    async fn await_with_grace(
        &self,
        handles: Vec<tokio::task::JoinHandle<StorePipelineResult>>,
    ) -> Vec<StorePipelineResult> {
        let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
        let mut results = Vec::new();
        for h in handles {
            let abort_handle = h.abort_handle();
            match tokio::time::timeout_at(deadline, h).await {
                Ok(Ok(r)) => results.push(r),
                Ok(Err(e)) => tracing::error!(error = %e, "store-pipeline task panicked"),
                Err(_) => {
                    abort_handle.abort();
                    tracing::warn!("store-pipeline task did not finish within the cancellation grace period");
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn fresh_store_plans_from_start_date_to_today() {
        let windows = plan_windows(&[], d("2025-03-01"), d("2025-03-10"), 90, 1);
        assert_eq!(windows, vec![Window::new(d("2025-03-01"), d("2025-03-10"))]);
    }

    #[test]
    fn today_equals_start_date_plans_a_single_day_window() {
        let windows = plan_windows(&[], d("2025-03-10"), d("2025-03-10"), 90, 1);
        assert_eq!(windows, vec![Window::new(d("2025-03-10"), d("2025-03-10"))]);
    }

    #[test]
    fn overlap_pulls_next_from_back_by_k_minus_one_days() {
        let successes = vec![(d("2025-01-01"), d("2025-01-05"))];
        let windows = plan_windows(&successes, d("2024-01-01"), d("2025-01-07"), 90, 2);
        assert_eq!(windows, vec![Window::new(d("2025-01-04"), d("2025-01-07"))]);
    }

    #[test]
    fn last_success_at_today_with_k_one_reruns_just_today() {
        let successes = vec![(d("2025-01-01"), d("2025-01-07"))];
        let windows = plan_windows(&successes, d("2024-01-01"), d("2025-01-07"), 90, 1);
        assert_eq!(windows, vec![Window::new(d("2025-01-07"), d("2025-01-07"))]);
    }

    #[test]
    fn window_days_one_yields_one_window_per_day() {
        let windows = plan_windows(&[], d("2025-03-01"), d("2025-03-03"), 1, 1);
        assert_eq!(
            windows,
            vec![
                Window::new(d("2025-03-01"), d("2025-03-01")),
                Window::new(d("2025-03-02"), d("2025-03-02")),
                Window::new(d("2025-03-03"), d("2025-03-03")),
            ]
        );
    }

    #[test]
    fn today_refresh_appended_when_chunking_produces_no_windows() {
        // start_date is after today: chunks() returns nothing, so the
        // today-refresh window must still be enqueued.
        let windows = plan_windows(&[], d("2025-03-15"), d("2025-03-10"), 90, 1);
        assert_eq!(windows, vec![Window::single_day(d("2025-03-10"))]);
    }

    #[test]
    fn should_run_is_true_when_forced_regardless_of_coverage() {
        assert!(should_run(
            Window::new(d("2025-01-01"), d("2025-01-01")),
            true,
            Some(d("2025-01-10")),
            1,
            true,
        ));
    }

    #[test]
    fn should_run_is_true_for_uncovered_window() {
        assert!(should_run(
            Window::new(d("2025-01-01"), d("2025-01-01")),
            false,
            None,
            1,
            false,
        ));
    }

    #[test]
    fn should_run_is_false_for_covered_window_outside_overlap() {
        assert!(!should_run(
            Window::new(d("2025-01-01"), d("2025-01-01")),
            false,
            Some(d("2025-01-10")),
            1,
            true,
        ));
    }

    #[test]
    fn should_run_is_true_inside_overlap_even_if_covered() {
        assert!(should_run(
            Window::new(d("2025-01-10"), d("2025-01-10")),
            false,
            Some(d("2025-01-10")),
            2,
            true,
        ));
    }

    proptest::proptest! {
        #[test]
        fn plan_windows_never_exceeds_chunk_size(
            start_offset in 0i64..200,
            span in 0i64..200,
            n in 1i64..90,
            k in 0i64..5,
        ) {
            let start_date = d("2024-01-01") + chrono::Duration::days(start_offset);
            let today = start_date + chrono::Duration::days(span);
            let windows = plan_windows(&[], start_date, today, n, k);
            for w in &windows {
                prop_assert!(w.days() <= n.max(1));
            }
        }
    }
}
