//! Top-level orchestration: the thin seam the CLI binary calls into.
//!
//! Everything the binary needs to do one invocation — open the pool, apply
//! migrations, run the profiler, dispatch notifications — lives here so
//! `sync-cli::main` stays a parse-args-and-print adapter, matching the
//! core-library/CLI-adapter split the rest of this workspace follows.

use std::path::PathBuf;
use std::time::Duration;

use sync_config::AppConfig;
use sync_types::{SyncError, SyncGroup};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{self, DispatchOutcome, Mailer, SmtpMailer};
use crate::profiler::{Profiler, ProfilerConfig, ProfilerOutcome};
use crate::{clock, db};

/// The CLI-observable invocation parameters: environment, optional sync
/// group and store filters, window sizing, worker concurrency, and a force
/// flag that disables coverage checks.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub run_env: String,
    pub sync_group: Option<SyncGroup>,
    pub window_days: i64,
    pub overlap_days: i64,
    pub max_workers: usize,
    pub force: bool,
    pub store_code: Option<String>,
}

/// Everything produced by one full invocation.
pub struct RunOutcome {
    pub profiler: ProfilerOutcome,
    pub dispatch: Option<DispatchOutcome>,
}

struct NullMailer;

#[async_trait::async_trait]
impl Mailer for NullMailer {
    async fn send(&self, email: dispatch::EmailEnvelope) -> Result<(), SyncError> {
        tracing::info!(to = ?email.to, subject = %email.subject, "SMTP not configured, dropping email");
        Ok(())
    }
}

fn session_and_download_dirs(cfg: &AppConfig) -> (PathBuf, PathBuf) {
    (cfg.session_dir.clone(), cfg.download_dir.clone())
}

/// Run one full invocation of the orders sync scheduler: connect, migrate,
/// plan and execute every eligible store's windows, then dispatch
/// notifications for the resulting run.
pub async fn run(
    config: &AppConfig,
    args: RunArgs,
    cancel: CancellationToken,
) -> Result<RunOutcome, SyncError> {
    let tz = clock::parse_tz(&config.pipeline_timezone).ok_or_else(|| {
        SyncError::fatal_config(format!("unrecognized timezone '{}'", config.pipeline_timezone))
    })?;

    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let (session_dir, download_dir) = session_and_download_dirs(config);

    let profiler_config = ProfilerConfig {
        pipeline_name: "orders_sync".to_string(),
        run_env: args.run_env,
        window_days: args.window_days,
        overlap_days: args.overlap_days,
        max_workers: args.max_workers,
        force: args.force,
        sync_group_filter: args.sync_group,
        store_code_filter: args.store_code,
        ingest_batch_size: config.ingest_batch_size as usize,
        session_dir,
        download_dir,
        headless: config.headless,
        watchdog: config.watchdog,
        tz,
    };

    let profiler = Profiler::new(pool.clone(), profiler_config);
    let outcome = profiler.run(cancel).await?;

    let dispatch_outcome = match &config.smtp {
        Some(smtp) => {
            let mailer = SmtpMailer::new(smtp)?;
            Some(dispatch::dispatch_for_run(&pool, &mailer, &outcome.run_id).await?)
        }
        None => {
            tracing::info!("SMTP_HOST not set, dispatching with a no-op mailer");
            let mailer = NullMailer;
            Some(dispatch::dispatch_for_run(&pool, &mailer, &outcome.run_id).await?)
        }
    };

    Ok(RunOutcome { profiler: outcome, dispatch: dispatch_outcome })
}

/// Exit-code mapping for the scheduler's invocation contract: `ok` is zero;
/// `error` is always non-zero; `partial`/`warning` are non-zero only when
/// every planned window failed (no window in the run ever succeeded).
pub fn exit_code(outcome: &ProfilerOutcome) -> i32 {
    use sync_types::{RunSummaryStatus, SyncStatus};

    let any_success = outcome
        .results
        .iter()
        .flat_map(|r| r.outcomes.iter())
        .any(|o| o.status == SyncStatus::Success);

    match outcome.overall_status {
        RunSummaryStatus::Ok => 0,
        RunSummaryStatus::Error => 1,
        RunSummaryStatus::Partial | RunSummaryStatus::Warning => {
            if any_success {
                0
            } else {
                1
            }
        }
        RunSummaryStatus::Running => 1,
    }
}

/// Diagnostics surfaced by the `doctor` CLI command: can we reach the
/// database, does the configured timezone resolve, are the session and
/// download directories writable.
pub struct Diagnostics {
    pub database_reachable: bool,
    pub timezone_valid: bool,
    pub session_dir_writable: bool,
    pub download_dir_writable: bool,
}

fn dir_is_writable(dir: &std::path::Path) -> bool {
    std::fs::create_dir_all(dir).is_ok()
        && std::fs::metadata(dir).map(|m| !m.permissions().readonly()).unwrap_or(false)
}

pub async fn diagnose(config: &AppConfig) -> Diagnostics {
    let timezone_valid = clock::parse_tz(&config.pipeline_timezone).is_some();
    let database_reachable = tokio::time::timeout(Duration::from_secs(5), db::connect(&config.database_url))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    Diagnostics {
        database_reachable,
        timezone_valid,
        session_dir_writable: dir_is_writable(&config.session_dir),
        download_dir_writable: dir_is_writable(&config.download_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WindowOutcome;
    use crate::profiler::StorePipelineResult;
    use sync_types::{RunSummaryStatus, SyncStatus, Window};

    fn window_outcome(status: SyncStatus) -> WindowOutcome {
        WindowOutcome {
            window: Window::single_day(chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()),
            status,
            error_message: None,
        }
    }

    fn outcome(overall: RunSummaryStatus, statuses: Vec<SyncStatus>) -> ProfilerOutcome {
        ProfilerOutcome {
            run_id: "run-1".to_string(),
            overall_status: overall,
            results: vec![StorePipelineResult {
                store_code: "A1".to_string(),
                pipeline_id: "td_orders",
                outcomes: statuses.into_iter().map(window_outcome).collect(),
                halted: false,
                skipped_lock: false,
            }],
        }
    }

    #[test]
    fn ok_run_exits_zero() {
        let o = outcome(RunSummaryStatus::Ok, vec![SyncStatus::Success]);
        assert_eq!(exit_code(&o), 0);
    }

    #[test]
    fn error_run_always_exits_non_zero() {
        let o = outcome(RunSummaryStatus::Error, vec![SyncStatus::Failed]);
        assert_eq!(exit_code(&o), 1);
    }

    #[test]
    fn partial_with_a_success_exits_zero() {
        let o = outcome(RunSummaryStatus::Partial, vec![SyncStatus::Partial]);
        assert_eq!(exit_code(&o), 0);
    }

    #[test]
    fn warning_with_no_success_exits_non_zero() {
        // Warning requires a success by its rollup definition, but the exit
        // mapping is defensive in case results disagree with overall_status.
        let o = outcome(RunSummaryStatus::Warning, vec![SyncStatus::Failed]);
        assert_eq!(exit_code(&o), 1);
    }
}
