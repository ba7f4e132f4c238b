//! Debounced single-file re-indexing driven by change events.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::Result;
use crate::pipeline::FilePipeline;
use crate::session::SessionStatus;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Attempts per change before a transient failure is given up on.
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Handle to the background updater task.
///
/// The task runs until every clone of the handle is dropped.
#[derive(Debug, Clone)]
pub struct IncrementalUpdater {
    tx: mpsc::UnboundedSender<ChangeEvent>,
    applied: watch::Receiver<usize>,
}

impl IncrementalUpdater {
    /// Spawn the updater on the current runtime.
    ///
    /// `lease` is the orchestrator's collection lease and `status` its status
    /// channel; while a session is discovering or processing, ready changes are
    /// held back and replayed once it pauses or finishes.
    #[must_use]
    pub fn spawn(
        pipeline: Arc<FilePipeline>,
        lease: Arc<tokio::sync::Mutex<()>>,
        status: watch::Receiver<SessionStatus>,
        debounce: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (applied_tx, applied) = watch::channel(0);
        let worker = Worker {
            pipeline,
            lease,
            status,
            debounce,
            applied: applied_tx,
            pending: HashMap::new(),
            deferred: BTreeMap::new(),
            attempts: HashMap::new(),
            collection_ready: false,
        };
        tokio::spawn(worker.run(rx));
        Self { tx, applied }
    }

    /// Queue a raw change. Later events for the same path replace earlier ones.
    pub fn notify(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("incremental updater has shut down; change dropped");
        }
    }

    /// Count of debounced changes settled so far, for callers that need to wait.
    ///
    /// A change settles when it is applied or fails for good; transient
    /// failures are retried after another debounce window first.
    #[must_use]
    pub fn applied(&self) -> watch::Receiver<usize> {
        self.applied.clone()
    }
}

struct Worker {
    pipeline: Arc<FilePipeline>,
    lease: Arc<tokio::sync::Mutex<()>>,
    status: watch::Receiver<SessionStatus>,
    debounce: Duration,
    applied: watch::Sender<usize>,
    /// Changes still inside their debounce window.
    pending: HashMap<PathBuf, (ChangeKind, Instant)>,
    /// Changes whose window elapsed while a session held the collection.
    deferred: BTreeMap<PathBuf, ChangeKind>,
    /// Failed attempts for changes waiting to be retried.
    attempts: HashMap<PathBuf, u32>,
    collection_ready: bool,
}

fn session_blocks(status: SessionStatus) -> bool {
    matches!(status, SessionStatus::Discovering | SessionStatus::Processing)
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ChangeEvent>) {
        let mut status_closed = false;
        loop {
            let next_due = self.pending.values().map(|(_, due)| *due).min();
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.deferred.remove(&event.path);
                    self.attempts.remove(&event.path);
                    let due = Instant::now() + self.debounce;
                    self.pending.insert(event.path, (event.kind, due));
                }
                () = sleep_until(next_due), if next_due.is_some() => {
                    let now = Instant::now();
                    let ready: Vec<PathBuf> = self
                        .pending
                        .iter()
                        .filter(|(_, (_, due))| *due <= now)
                        .map(|(p, _)| p.clone())
                        .collect();
                    for path in ready {
                        if let Some((kind, _)) = self.pending.remove(&path) {
                            self.deferred.insert(path, kind);
                        }
                    }
                }
                changed = self.status.changed(), if !self.deferred.is_empty() && !status_closed => {
                    status_closed = changed.is_err();
                }
            }
            self.flush().await;
        }
        tracing::debug!("incremental updater stopped");
    }

    async fn flush(&mut self) {
        if self.deferred.is_empty() || session_blocks(*self.status.borrow()) {
            return;
        }
        let lease = Arc::clone(&self.lease);
        let Ok(_lease) = lease.try_lock() else {
            // Session is between status updates.
            self.retry_later();
            return;
        };

        if !self.collection_ready {
            match self.pipeline.ensure_collection().await {
                Ok(_) => self.collection_ready = true,
                Err(e) => {
                    tracing::warn!("incremental update postponed, collection unavailable: {e}");
                    self.retry_later();
                    return;
                }
            }
        }

        let batch = std::mem::take(&mut self.deferred);
        let mut settled = 0;
        let mut failed = Vec::new();
        for (path, kind) in batch {
            let rel = self.pipeline.discovery().relative_path(&path);
            match self.apply(&path, kind).await {
                Ok(()) => tracing::debug!(file = %rel, ?kind, "incremental update applied"),
                Err(e) if e.is_transient() => {
                    let attempts = self.attempts.entry(path.clone()).or_insert(0);
                    *attempts += 1;
                    if *attempts < MAX_ATTEMPTS {
                        tracing::warn!(
                            file = %rel,
                            ?kind,
                            attempt = *attempts,
                            "incremental update failed, will retry: {e}"
                        );
                        failed.push((path, kind));
                        continue;
                    }
                    tracing::error!(
                        file = %rel,
                        ?kind,
                        "incremental update abandoned after {MAX_ATTEMPTS} attempts: {e}"
                    );
                }
                Err(e) => tracing::warn!(file = %rel, ?kind, "incremental update failed: {e}"),
            }
            self.attempts.remove(&path);
            settled += 1;
        }

        if !failed.is_empty() {
            self.collection_ready = false;
            let due = Instant::now() + self.debounce;
            for (path, kind) in failed {
                self.pending.entry(path).or_insert((kind, due));
            }
        }
        if settled > 0 {
            self.applied.send_modify(|n| *n += settled);
        }
    }

    /// Put deferred changes back into the debounce queue for another window.
    fn retry_later(&mut self) {
        let due = Instant::now() + self.debounce;
        for (path, kind) in std::mem::take(&mut self.deferred) {
            self.pending.entry(path).or_insert((kind, due));
        }
    }

    async fn apply(&self, path: &Path, kind: ChangeKind) -> Result<()> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if kind == ChangeKind::Deleted || !exists {
            self.pipeline.remove_file(path).await
        } else {
            self.pipeline.index_file(path).await.map(|_| ())
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
