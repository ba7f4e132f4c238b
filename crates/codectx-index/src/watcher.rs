use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use tokio::sync::mpsc;

use crate::discovery::FileDiscovery;
use crate::error::Result;
use crate::updater::{ChangeEvent, ChangeKind, IncrementalUpdater};

/// Coalescing window of the OS-level watcher; the updater debounces again per path.
const FS_DEBOUNCE: Duration = Duration::from_millis(200);

/// Follows a workspace on disk and forwards indexable changes to the updater.
pub struct IndexWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(
        root: &Path,
        discovery: Arc<FileDiscovery>,
        updater: IncrementalUpdater,
    ) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(64);

        let filter = Arc::clone(&discovery);
        let mut debouncer = new_debouncer(
            FS_DEBOUNCE,
            move |events: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let paths: HashSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any && filter.is_candidate(&e.path))
                    .map(|e| e.path)
                    .collect();

                for path in paths {
                    let _ = notify_tx.blocking_send(path);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(path) = notify_rx.recv().await {
                updater.notify(classify(path).await);
            }
        });

        tracing::info!(root = %discovery.root().display(), "watching workspace for changes");
        Ok(Self { _handle: handle })
    }
}

/// The mini debouncer reports a bare path, so existence decides the kind.
async fn classify(path: PathBuf) -> ChangeEvent {
    let kind = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        ChangeKind::Modified
    } else {
        ChangeKind::Deleted
    };
    ChangeEvent { path, kind }
}

#[cfg(all(test, feature = "lang-rust"))]
mod tests {
    use codectx_llm::mock::MockProvider;
    use codectx_llm::{AnyProvider, EmbeddingGateway, GatewayConfig};
    use codectx_store::{InMemoryVectorStore, VectorStore};
    use tokio::sync::watch;

    use super::*;
    use crate::discovery::{DEFAULT_MAX_FILE_BYTES, IgnoreRules};
    use crate::pipeline::{FilePipeline, PipelineConfig};
    use crate::session::SessionStatus;

    fn updater_for(discovery: &Arc<FileDiscovery>) -> IncrementalUpdater {
        let pipeline = Arc::new(FilePipeline::new(
            Arc::clone(discovery),
            EmbeddingGateway::new(
                Arc::new(AnyProvider::Mock(MockProvider::new(8))),
                GatewayConfig::default(),
            ),
            Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>,
            PipelineConfig::default(),
        ));
        let (_tx, rx) = watch::channel(SessionStatus::NotStarted);
        IncrementalUpdater::spawn(
            pipeline,
            Arc::new(tokio::sync::Mutex::new(())),
            rx,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn start_with_valid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = Arc::new(
            FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
                .unwrap(),
        );
        let updater = updater_for(&discovery);
        let watcher = IndexWatcher::start(discovery.root(), Arc::clone(&discovery), updater);
        assert!(watcher.is_ok());
    }

    #[tokio::test]
    async fn start_with_nonexistent_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = Arc::new(
            FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
                .unwrap(),
        );
        let updater = updater_for(&discovery);
        let result = IndexWatcher::start(Path::new("/nonexistent/path/xyz"), discovery, updater);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_path_classifies_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.rs");
        std::fs::write(&present, "fn a() {}").unwrap();

        assert_eq!(classify(present.clone()).await.kind, ChangeKind::Modified);
        assert_eq!(
            classify(dir.path().join("b.rs")).await.kind,
            ChangeKind::Deleted
        );
    }
}
