//! Error types for codectx-index.

use std::path::PathBuf;

use codectx_llm::LlmError;
use codectx_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Workspace root missing or unreadable; fatal to session start.
    #[error("cannot read workspace root {}: {source}", root.display())]
    Discovery {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed source; the file is skipped until it changes again.
    #[error("parse failed for {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("embedding provider error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("an indexing session is already active")]
    AlreadyRunning,

    #[error("no indexing session is active")]
    NotRunning,

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether this error ends the whole session rather than skipping one file.
    ///
    /// Store failures and rejected credentials are fatal; parse errors and
    /// transient provider failures are not.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Store(_) | Self::Discovery { .. } => true,
            Self::Llm(e) => e.is_auth(),
            _ => false,
        }
    }

    /// Whether the same file may index cleanly if retried later: the store was
    /// unreachable or the provider failed with a retryable error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => matches!(
                e,
                StoreError::Unavailable(_) | StoreError::CollectionNotFound(_)
            ),
            Self::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
