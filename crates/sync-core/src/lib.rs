//! Core library for the orders sync scheduler: the profiler/orchestrator,
//! the TD and UC sync engines, and the notification dispatcher.
//!
//! Each concern gets its own module: the store registry, the sync-log and
//! run-summary repositories, staging and production merges, workbook
//! parsing, web automation, the profiler that plans and runs windows, and
//! the dispatcher that turns a finished run into emails. `runner` wires all
//! of it together behind the single entrypoint the CLI binary calls.

pub mod clock;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod lock;
pub mod production;
pub mod profiler;
pub mod registry;
pub mod runner;
pub mod runsummary;
pub mod session;
pub mod staging;
pub mod synclog;
pub mod webauto;
pub mod workbook;

pub use engine::{EngineContext, WindowOutcome};
pub use profiler::{Profiler, ProfilerConfig, ProfilerOutcome, StorePipelineResult};
pub use runner::{Diagnostics, RunArgs, RunOutcome};
