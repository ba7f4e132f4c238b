//! Pausable, stoppable indexing sessions over a bounded worker pool.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{IndexError, Result};
use crate::events::{PROGRESS_INTERVAL, ProgressEvent, should_emit};
use crate::pipeline::FilePipeline;
use crate::session::{SessionReport, SessionState, SessionStatus, SkippedEntry};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker count; 0 picks `max(1, cpus - 1)`.
    pub max_workers: usize,
    /// Forces a single worker.
    pub low_intensity: bool,
    /// Pause each worker takes before picking up its next file.
    pub dispatch_delay: Duration,
    /// Remove chunks of files no longer on disk when a session completes.
    pub prune_stale: bool,
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            low_intensity: false,
            dispatch_delay: Duration::ZERO,
            prune_stale: true,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.low_intensity {
            return 1;
        }
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .saturating_sub(1)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

/// Everything the driver and its workers share.
#[derive(Clone)]
struct Shared {
    pipeline: Arc<FilePipeline>,
    config: OrchestratorConfig,
    state: Arc<Mutex<SessionState>>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
    events_tx: broadcast::Sender<ProgressEvent>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events go out while the state lock is held so subscribers see them in
    /// counter order.
    fn set_status(&self, status: SessionStatus) {
        let mut st = self.lock();
        st.status = status;
        if status.is_terminal() {
            st.finished_after = st.started_at.map(|t| t.elapsed());
        }
        tracing::info!(session = %st.session_id, %status, "indexing session status");
        self.status_tx.send_replace(status);
        let _ = self.events_tx.send(ProgressEvent {
            session_id: st.session_id.clone(),
            processed: st.processed_files,
            total: st.total_files,
            current_file: None,
            status,
        });
    }

    fn fatal(&self) -> bool {
        self.lock().error.is_some()
    }

    /// Take the next file off the queue unless the session should wind down.
    fn next_file(&self, control: Control) -> Option<PathBuf> {
        let mut st = self.lock();
        if control != Control::Run || st.error.is_some() {
            return None;
        }
        let path = st.pending.pop_front()?;
        st.in_flight += 1;
        Some(path)
    }

    fn record(&self, rel: String, outcome: Result<()>) {
        let mut st = self.lock();
        st.in_flight -= 1;
        match outcome {
            Err(e) if e.is_session_fatal() => {
                tracing::error!(file = %rel, "indexing aborted: {e}");
                st.error.get_or_insert_with(|| e.to_string());
                return;
            }
            Err(e) => {
                tracing::warn!(file = %rel, "skipping file: {e}");
                st.skipped.push(SkippedEntry {
                    path: rel.clone(),
                    reason: e.to_string(),
                });
            }
            Ok(()) => st.indexed_files += 1,
        }
        st.processed_files += 1;

        let now = Instant::now();
        let last_file = st.processed_files == st.total_files;
        if !should_emit(st.last_progress, now, self.config.progress_interval, last_file) {
            return;
        }
        st.last_progress = Some(now);
        let _ = self.events_tx.send(ProgressEvent {
            session_id: st.session_id.clone(),
            processed: st.processed_files,
            total: st.total_files,
            current_file: Some(rel),
            status: st.status,
        });
    }

    fn finalize(&self, status: SessionStatus) -> SessionReport {
        {
            let mut st = self.lock();
            st.pending.clear();
        }
        self.set_status(status);
        self.lock().report()
    }
}

/// Runs one indexing session at a time over a workspace.
///
/// Control calls (`pause`, `resume`, `stop`) only flip a flag; workers check
/// it between files, so a file is never abandoned half-written.
pub struct IndexingOrchestrator {
    shared: Shared,
    control_tx: watch::Sender<Control>,
    driver: Mutex<Option<JoinHandle<SessionReport>>>,
}

impl std::fmt::Debug for IndexingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingOrchestrator")
            .field("pipeline", &self.shared.pipeline)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl IndexingOrchestrator {
    #[must_use]
    pub fn new(pipeline: Arc<FilePipeline>, config: OrchestratorConfig) -> Self {
        let state = SessionState::new(
            pipeline.workspace_id().to_owned(),
            pipeline.collection().to_owned(),
        );
        let (status_tx, _) = watch::channel(SessionStatus::NotStarted);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (control_tx, _) = watch::channel(Control::Run);
        Self {
            shared: Shared {
                pipeline,
                config,
                state: Arc::new(Mutex::new(state)),
                status_tx: Arc::new(status_tx),
                events_tx,
                lease: Arc::new(tokio::sync::Mutex::new(())),
            },
            control_tx,
            driver: Mutex::new(None),
        }
    }

    /// Held by a running session; the incremental updater must acquire it
    /// before touching the collection.
    #[must_use]
    pub fn lease(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.shared.lease)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.events_tx.subscribe()
    }

    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SessionReport {
        self.shared.lock().report()
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<FilePipeline> {
        &self.shared.pipeline
    }

    fn driver_slot(&self) -> MutexGuard<'_, Option<JoinHandle<SessionReport>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a fresh session: full discovery, then indexing on the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::AlreadyRunning`] while a session is active or
    /// paused, and [`IndexError::Discovery`] if the root is no longer readable.
    pub async fn start(&self) -> Result<String> {
        let root = self.shared.pipeline.discovery().root().to_path_buf();
        if let Err(source) = tokio::fs::read_dir(&root).await {
            return Err(IndexError::Discovery { root, source });
        }

        let mut slot = self.driver_slot();
        let session_id = {
            let mut st = self.shared.lock();
            if st.status.is_active() {
                return Err(IndexError::AlreadyRunning);
            }
            let id = uuid::Uuid::new_v4().to_string();
            st.reset(id.clone());
            id
        };
        self.control_tx.send_replace(Control::Run);
        self.shared.set_status(SessionStatus::Discovering);

        let shared = self.shared.clone();
        let control_rx = self.control_tx.subscribe();
        *slot = Some(tokio::spawn(drive(shared, control_rx)));
        tracing::info!(session = %session_id, root = %self.shared.pipeline.discovery().root().display(), "indexing session started");
        Ok(session_id)
    }

    /// Stop dispatching after the files in flight; the queue is kept for `resume`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotRunning`] when no session is active.
    pub fn pause(&self) -> Result<()> {
        if !self.shared.lock().status.is_active() {
            return Err(IndexError::NotRunning);
        }
        self.control_tx.send_if_modified(|c| {
            if *c == Control::Run {
                *c = Control::Pause;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotRunning`] when no session is active.
    pub fn resume(&self) -> Result<()> {
        if !self.shared.lock().status.is_active() {
            return Err(IndexError::NotRunning);
        }
        self.control_tx.send_if_modified(|c| {
            if *c == Control::Pause {
                *c = Control::Run;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    /// Stop the session, discarding the queue. Waits for in-flight files to
    /// finish and returns how many files the session processed.
    ///
    /// Stopping an already finished session returns its final count.
    pub async fn stop(&self) -> usize {
        self.control_tx.send_replace(Control::Stop);
        let handle = self.driver_slot().take();
        match handle {
            Some(handle) => match handle.await {
                Ok(report) => report.processed_files,
                Err(e) => {
                    tracing::error!("indexing driver failed: {e}");
                    self.status().processed_files
                }
            },
            None => self.wait().await.processed_files,
        }
    }

    /// Wait until the current session reaches a terminal state.
    ///
    /// Returns immediately when no session was ever started.
    pub async fn wait(&self) -> SessionReport {
        let mut rx = self.shared.status_tx.subscribe();
        let _ = rx.wait_for(|s| !s.is_active()).await;
        self.status()
    }
}

async fn drive(shared: Shared, mut control_rx: watch::Receiver<Control>) -> SessionReport {
    let discovery = Arc::clone(shared.pipeline.discovery());
    let walked = tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for item in discovery.walk() {
            match item {
                Ok(path) => files.push(path),
                Err(s) => skipped.push(SkippedEntry {
                    path: discovery.relative_path(&s.path),
                    reason: s.reason,
                }),
            }
        }
        (files, skipped)
    })
    .await;

    let (files, skipped) = match walked {
        Ok(v) => v,
        Err(e) => {
            shared.lock().error = Some(format!("discovery task failed: {e}"));
            return shared.finalize(SessionStatus::Error);
        }
    };
    let present: HashSet<String> = files
        .iter()
        .map(|p| shared.pipeline.discovery().relative_path(p))
        .collect();
    {
        let mut st = shared.lock();
        st.total_files = files.len();
        st.pending = files.into();
        st.skipped = skipped;
    }
    tracing::info!(files = present.len(), "discovery finished");

    if *control_rx.borrow() == Control::Stop {
        return shared.finalize(SessionStatus::Stopped);
    }
    if let Err(e) = shared.pipeline.ensure_collection().await {
        tracing::error!("cannot prepare collection: {e}");
        shared.lock().error = Some(e.to_string());
        return shared.finalize(SessionStatus::Error);
    }
    shared.set_status(SessionStatus::Processing);

    loop {
        {
            let _lease = Arc::clone(&shared.lease).lock_owned().await;
            run_pool(&shared, &control_rx).await;
        }

        if shared.fatal() {
            return shared.finalize(SessionStatus::Error);
        }
        let control = *control_rx.borrow_and_update();
        match control {
            Control::Stop => return shared.finalize(SessionStatus::Stopped),
            Control::Pause => {
                shared.set_status(SessionStatus::Paused);
                let resumed = control_rx.wait_for(|c| *c != Control::Pause).await;
                match resumed.map(|c| *c) {
                    Ok(Control::Run) => shared.set_status(SessionStatus::Processing),
                    _ => return shared.finalize(SessionStatus::Stopped),
                }
            }
            Control::Run => {
                if shared.lock().pending.is_empty() {
                    if shared.config.prune_stale {
                        match shared.pipeline.prune_missing(&present).await {
                            Ok(n) => shared.lock().pruned_files = n,
                            Err(e) => tracing::warn!("pruning stale files failed: {e}"),
                        }
                    }
                    return shared.finalize(SessionStatus::Completed);
                }
            }
        }
    }
}

async fn run_pool(shared: &Shared, control_rx: &watch::Receiver<Control>) {
    let workers = shared.config.worker_count();
    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(worker(shared.clone(), control_rx.clone()));
    }
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            tracing::error!("indexing worker panicked: {e}");
        }
    }
}

async fn worker(shared: Shared, mut control_rx: watch::Receiver<Control>) {
    let delay = shared.config.dispatch_delay;
    loop {
        if *control_rx.borrow_and_update() != Control::Run || shared.fatal() {
            return;
        }
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = control_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        let control = *control_rx.borrow();
        let Some(path) = shared.next_file(control) else {
            return;
        };
        let rel = shared.pipeline.discovery().relative_path(&path);
        let outcome = shared.pipeline.index_file(&path).await.map(|_| ());
        shared.record(rel, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_intensity_forces_one_worker() {
        let cfg = OrchestratorConfig {
            max_workers: 8,
            low_intensity: true,
            ..OrchestratorConfig::default()
        };
        assert_eq!(cfg.worker_count(), 1);
    }

    #[test]
    fn explicit_worker_count_wins() {
        let cfg = OrchestratorConfig {
            max_workers: 3,
            ..OrchestratorConfig::default()
        };
        assert_eq!(cfg.worker_count(), 3);
    }

    #[test]
    fn auto_worker_count_is_at_least_one() {
        assert!(OrchestratorConfig::default().worker_count() >= 1);
    }
}
