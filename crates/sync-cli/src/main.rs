use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sync_config::AppConfig;
use sync_core::RunArgs;
use sync_types::SyncGroup;
use tokio_util::sync::CancellationToken;

mod report;

/// Orders sync scheduler: logs into each store's CRM web UI, downloads its
/// reports, and ingests them into the warehouse.
#[derive(Parser, Debug)]
#[command(name = "orders-sync", version, about)]
struct Cli {
    /// Emit structured JSON log lines instead of the default pretty format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sync for every eligible store once, then exit.
    Run {
        /// The deployment environment this invocation runs in (e.g. "prod",
        /// "staging"). Recorded on every sync-log and run-summary row.
        #[arg(long, default_value = "prod")]
        env: String,

        /// Restrict this run to one sync group. Defaults to both.
        #[arg(long, value_name = "TD|UC")]
        sync_group: Option<SyncGroup>,

        /// Restrict this run to one store code.
        #[arg(long)]
        store: Option<String>,

        /// Size in days of each backfill window chunk.
        #[arg(long)]
        window_days: Option<i64>,

        /// Days of overlap re-run before the most recent success.
        #[arg(long)]
        overlap_days: Option<i64>,

        /// Maximum number of stores processed concurrently.
        #[arg(long)]
        max_workers: Option<usize>,

        /// Re-run every planned window even if it is already covered by a
        /// recorded success.
        #[arg(long)]
        force: bool,
    },
    /// Check connectivity, timezone configuration, and directory
    /// permissions without running any sync.
    Doctor,
}

fn init_tracing(json_logs: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: failed to resolve the working directory: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match AppConfig::from_env(&cwd) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Run {
            env,
            sync_group,
            store,
            window_days,
            overlap_days,
            max_workers,
            force,
        } => {
            let args = RunArgs {
                run_env: env,
                sync_group,
                window_days: window_days.unwrap_or(config.window_days),
                overlap_days: overlap_days.unwrap_or(config.overlap_days),
                max_workers: max_workers.unwrap_or(config.max_workers),
                force,
                store_code: store,
            };
            run_command(&config, args).await
        }
        Commands::Doctor => doctor_command(&config).await,
    }
}

async fn run_command(config: &AppConfig, args: RunArgs) -> ExitCode {
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received interrupt, winding down in-flight store jobs");
            cancel_for_signal.cancel();
        }
    });

    match sync_core::runner::run(config, args, cancel).await {
        Ok(outcome) => {
            report::print_run_outcome(&outcome.profiler);
            if let Some(dispatch) = &outcome.dispatch {
                report::print_dispatch_outcome(dispatch);
            }
            let code = sync_core::runner::exit_code(&outcome.profiler);
            if code == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn doctor_command(config: &AppConfig) -> ExitCode {
    let diagnostics = sync_core::runner::diagnose(config).await;
    report::print_diagnostics(&diagnostics);

    let healthy = diagnostics.database_reachable
        && diagnostics.timezone_valid
        && diagnostics.session_dir_writable
        && diagnostics.download_dir_writable;
    if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_sync_group_filter() {
        let cli = Cli::parse_from(["orders-sync", "run", "--sync-group", "TD"]);
        match cli.command {
            Commands::Run { sync_group, .. } => assert_eq!(sync_group, Some(SyncGroup::Td)),
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn run_rejects_unknown_sync_group() {
        let result = Cli::try_parse_from(["orders-sync", "run", "--sync-group", "XX"]);
        assert!(result.is_err());
    }

    #[test]
    fn doctor_parses_with_no_extra_args() {
        let cli = Cli::parse_from(["orders-sync", "doctor"]);
        assert!(matches!(cli.command, Commands::Doctor));
    }
}
