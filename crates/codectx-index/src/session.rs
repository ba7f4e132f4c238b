//! Indexing session state, owned by the orchestrator.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Discovering,
    Processing,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl SessionStatus {
    /// A session in this state blocks `start()` and holds or may reacquire
    /// the collection lease.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Discovering | Self::Processing | Self::Paused)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Discovering => "discovering",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

/// Point-in-time view of a session; the final one is the session result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub workspace_id: String,
    pub collection_name: String,
    pub status: SessionStatus,
    pub total_files: usize,
    /// Files finished in this session, including the ones skipped with an error.
    pub processed_files: usize,
    pub indexed_files: usize,
    pub pending_files: usize,
    pub skipped_files: Vec<SkippedEntry>,
    pub pruned_files: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    pub session_id: String,
    pub workspace_id: String,
    pub collection_name: String,
    pub status: SessionStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub indexed_files: usize,
    pub pending: VecDeque<PathBuf>,
    pub in_flight: usize,
    pub skipped: Vec<SkippedEntry>,
    pub pruned_files: usize,
    pub error: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_after: Option<Duration>,
    pub last_progress: Option<Instant>,
}

impl SessionState {
    pub fn new(workspace_id: String, collection_name: String) -> Self {
        Self {
            session_id: String::new(),
            workspace_id,
            collection_name,
            status: SessionStatus::NotStarted,
            total_files: 0,
            processed_files: 0,
            indexed_files: 0,
            pending: VecDeque::new(),
            in_flight: 0,
            skipped: Vec::new(),
            pruned_files: 0,
            error: None,
            started_at: None,
            finished_after: None,
            last_progress: None,
        }
    }

    /// Clear everything from the previous session and begin `session_id`.
    pub fn reset(&mut self, session_id: String) {
        *self = Self {
            session_id,
            status: SessionStatus::Discovering,
            started_at: Some(Instant::now()),
            ..Self::new(
                std::mem::take(&mut self.workspace_id),
                std::mem::take(&mut self.collection_name),
            )
        };
    }

    pub fn report(&self) -> SessionReport {
        let elapsed = self
            .finished_after
            .or_else(|| self.started_at.map(|t| t.elapsed()))
            .unwrap_or_default();
        SessionReport {
            session_id: self.session_id.clone(),
            workspace_id: self.workspace_id.clone(),
            collection_name: self.collection_name.clone(),
            status: self.status,
            total_files: self.total_files,
            processed_files: self.processed_files,
            indexed_files: self.indexed_files,
            pending_files: self.pending.len(),
            skipped_files: self.skipped.clone(),
            pruned_files: self.pruned_files,
            error: self.error.clone(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
