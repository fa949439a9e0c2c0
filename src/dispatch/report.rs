//! Per-run outcome counters.

use uuid::Uuid;

use crate::dispatch::StreamKind;
use crate::error::FailureKind;

/// What happened in one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub stream: StreamKind,
    pub examined: usize,
    pub actions: usize,
    /// Skipped and marked so they are never reconsidered.
    pub terminal_skips: usize,
    /// Skipped without marking; eligible again on a later run.
    pub deferred: usize,
    pub failures: usize,
}

impl StreamReport {
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            examined: 0,
            actions: 0,
            terminal_skips: 0,
            deferred: 0,
            failures: 0,
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub streams: Vec<StreamReport>,
    /// Set when a failure stopped the remaining streams.
    pub aborted: Option<FailureKind>,
    pub dry_run: bool,
}

impl RunReport {
    pub fn total_actions(&self) -> usize {
        self.streams.iter().map(|s| s.actions).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.streams.iter().map(|s| s.failures).sum()
    }

    pub fn stream(&self, kind: StreamKind) -> Option<&StreamReport> {
        self.streams.iter().find(|s| s.stream == kind)
    }
}
