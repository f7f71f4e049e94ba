//! Plain-text rendering of a run's outcome for the `run` and `doctor`
//! subcommands. No TTY detection here — unlike a progress bar, a one-shot
//! summary is equally useful piped to a log file, so it always prints.

use sync_core::dispatch::DispatchOutcome;
use sync_core::profiler::{ProfilerOutcome, StorePipelineResult};
use sync_core::runner::Diagnostics;
use sync_types::{RunSummaryStatus, SyncStatus};

fn status_label(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Running => "running",
        SyncStatus::Partial => "partial",
        SyncStatus::Success => "success",
        SyncStatus::Failed => "failed",
    }
}

fn overall_label(status: RunSummaryStatus) -> &'static str {
    match status {
        RunSummaryStatus::Running => "running",
        RunSummaryStatus::Ok => "ok",
        RunSummaryStatus::Warning => "warning",
        RunSummaryStatus::Error => "error",
        RunSummaryStatus::Partial => "partial",
    }
}

fn print_store_pipeline(result: &StorePipelineResult) {
    let success = result.outcomes.iter().filter(|o| o.status == SyncStatus::Success).count();
    let partial = result.outcomes.iter().filter(|o| o.status == SyncStatus::Partial).count();
    let failed = result.outcomes.iter().filter(|o| o.status == SyncStatus::Failed).count();

    if result.skipped_lock {
        println!("{}/{}: skipped (advisory lock held by another host)", result.store_code, result.pipeline_id);
        return;
    }

    println!(
        "{}/{}: {} window(s) [{} success, {} partial, {} failed]{}",
        result.store_code,
        result.pipeline_id,
        result.outcomes.len(),
        success,
        partial,
        failed,
        if result.halted { ", halted" } else { "" }
    );
    for outcome in &result.outcomes {
        let err = outcome.error_message.as_deref().unwrap_or("");
        println!("  {} -> {}{}", outcome.window, status_label(outcome.status), if err.is_empty() { String::new() } else { format!(": {err}") });
    }
}

pub fn print_run_outcome(outcome: &ProfilerOutcome) {
    println!("run_id: {}", outcome.run_id);
    println!("overall_status: {}", overall_label(outcome.overall_status));
    println!();
    for result in &outcome.results {
        print_store_pipeline(result);
    }
}

pub fn print_dispatch_outcome(outcome: &DispatchOutcome) {
    println!();
    println!(
        "notifications: {} sent, {} skipped (already dispatched), {} failed",
        outcome.emails_sent, outcome.emails_skipped_already_dispatched, outcome.failures
    );
}

pub fn print_diagnostics(diagnostics: &Diagnostics) {
    println!("database_reachable: {}", diagnostics.database_reachable);
    println!("timezone_valid: {}", diagnostics.timezone_valid);
    println!("session_dir_writable: {}", diagnostics.session_dir_writable);
    println!("download_dir_writable: {}", diagnostics.download_dir_writable);
}
