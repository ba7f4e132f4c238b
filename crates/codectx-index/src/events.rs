//! Progress events published by the orchestrator.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub processed: usize,
    pub total: usize,
    /// Set for file completions, `None` for status transitions.
    pub current_file: Option<String>,
    pub status: SessionStatus,
}

/// Decide whether a file-completion event goes out, given when the last one did.
///
/// `force` bypasses the interval (last file of the session).
pub(crate) fn should_emit(
    last: Option<Instant>,
    now: Instant,
    interval: Duration,
    force: bool,
) -> bool {
    force || last.is_none_or(|t| now.saturating_duration_since(t) >= interval)
}
