//! Domain types shared by the orders sync scheduler crates.
//!
//! This crate holds the value objects the scheduler passes between the
//! store registry, the sync-log and run-summary stores, the sync engines,
//! the profiler, and the notification dispatcher. None of these types touch
//! a database or the network directly — persistence and I/O live in
//! `sync-core`.

pub mod error;
pub mod notify;
pub mod store;
pub mod sync_log;
pub mod window;

pub use error::{SyncError, SyncErrorKind};
pub use notify::{AttachMode, Document, NotificationProfile, NotificationScope, Recipient, Template};
pub use store::{Store, SyncConfig, SyncGroup};
pub use sync_log::{RunSummary, RunSummaryStatus, SyncLogEntry, SyncStatus};
pub use window::Window;
