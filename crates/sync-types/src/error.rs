//! Error taxonomy for the sync scheduler.
//!
//! This replaces "exceptions for control flow" with an explicit, closed set
//! of kinds. Every fallible operation in the web adapter, the DB layers, and
//! the profiler returns a [`SyncError`] instead of raising; only
//! [`SyncErrorKind::FatalConfig`] is meant to abort the process.

use thiserror::Error;

use crate::sync_log::SyncStatus;

/// The closed set of failure modes a sync attempt can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    Auth,
    LayoutDrift,
    Timeout,
    Download,
    Transport,
    Schema,
    Parse,
    Conflict,
    FatalConfig,
    Cancelled,
}

impl SyncErrorKind {
    /// Whether this kind is recovered locally with a single retry
    /// (transient transport failures get a context-recreate-and-retry;
    /// duplicate-row conflicts are resumable as-is).
    pub fn is_transient(self) -> bool {
        matches!(self, SyncErrorKind::Transport)
    }

    /// Whether the orchestrator should abort the whole process rather than
    /// fail just the current window/run.
    pub fn is_fatal_to_process(self) -> bool {
        matches!(self, SyncErrorKind::FatalConfig)
    }

    /// The sync-log terminal status a window outcome of this kind maps to.
    /// `Cancelled` also finalizes as `Failed`, carrying the distinguishing
    /// message "cancelled" rather than a distinct status value.
    pub fn terminal_status(self) -> SyncStatus {
        match self {
            SyncErrorKind::Conflict => SyncStatus::Running,
            _ => SyncStatus::Failed,
        }
    }
}

/// An error surfaced by any sync-scheduler component.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: SyncErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Auth, message)
    }

    pub fn layout_drift(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::LayoutDrift, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Timeout, message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Download, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Transport, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Schema, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Parse, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Conflict, message)
    }

    pub fn fatal_config(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::FatalConfig, message)
    }

    pub fn cancelled() -> Self {
        Self::new(SyncErrorKind::Cancelled, "cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_transient() {
        for kind in [
            SyncErrorKind::Auth,
            SyncErrorKind::LayoutDrift,
            SyncErrorKind::Timeout,
            SyncErrorKind::Download,
            SyncErrorKind::Schema,
            SyncErrorKind::Parse,
            SyncErrorKind::Conflict,
            SyncErrorKind::FatalConfig,
            SyncErrorKind::Cancelled,
        ] {
            assert!(!kind.is_transient(), "{kind:?} should not be transient");
        }
        assert!(SyncErrorKind::Transport.is_transient());
    }

    #[test]
    fn only_fatal_config_aborts_the_process() {
        assert!(SyncErrorKind::FatalConfig.is_fatal_to_process());
        assert!(!SyncErrorKind::Auth.is_fatal_to_process());
        assert!(!SyncErrorKind::Cancelled.is_fatal_to_process());
    }

    #[test]
    fn conflict_is_resumable_not_a_terminal_failure() {
        assert_eq!(SyncErrorKind::Conflict.terminal_status(), SyncStatus::Running);
        assert_eq!(SyncErrorKind::Timeout.terminal_status(), SyncStatus::Failed);
        assert_eq!(SyncErrorKind::Cancelled.terminal_status(), SyncStatus::Failed);
    }
}
