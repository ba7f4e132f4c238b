//! Wires configuration into a running indexing engine and answers host commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use codectx_index::{
    FileDiscovery, FilePipeline, IgnoreRules, IncrementalUpdater, IndexWatcher,
    IndexingOrchestrator, LlmQueryExpander, LlmReranker, OrchestratorConfig, PipelineConfig,
    ProgressEvent, QueryConfig, QueryService, SearchResponse, SessionReport,
};
use codectx_llm::ollama::OllamaProvider;
use codectx_llm::openai::OpenAiProvider;
use codectx_llm::{AnyProvider, EmbeddingGateway, GatewayConfig};
use codectx_store::{InMemoryVectorStore, QdrantStore, VectorStore};
use tokio::sync::broadcast;

use crate::command::{Command, CommandResponse};
use crate::config::{Config, ProviderKind, StoreBackend};
use crate::error::{CoreError, Result};
use crate::health::{HealthReport, PROBE_TIMEOUT, probe};

/// Build the embedding provider named by `[embedding]`.
///
/// # Errors
///
/// Returns [`CoreError::Config`] when a required key or secret is missing, or
/// the provider error if its HTTP client cannot be built.
pub fn build_provider(config: &Config) -> Result<AnyProvider> {
    let emb = &config.embedding;
    let base_url = emb.resolved_base_url().ok_or_else(|| {
        CoreError::Config(format!("embedding.base_url is required for provider {}", emb.provider))
    })?;
    let timeout = Duration::from_secs(emb.timeout_secs);

    let provider = match emb.provider {
        ProviderKind::Ollama => AnyProvider::Ollama(OllamaProvider::new(
            base_url,
            config.chat.model.clone(),
            emb.model.clone(),
        )),
        ProviderKind::OpenAi => {
            let key = config.secrets.openai_api_key.clone().ok_or_else(|| {
                CoreError::Config("CODECTX_OPENAI_API_KEY is not set".into())
            })?;
            AnyProvider::OpenAi(OpenAiProvider::new(
                key,
                base_url.to_owned(),
                config.chat.model.clone(),
                emb.model.clone(),
                timeout,
            )?)
        }
        ProviderKind::Compatible => {
            let key = config.secrets.openai_api_key.clone().unwrap_or_default();
            AnyProvider::OpenAi(
                OpenAiProvider::new(
                    key,
                    base_url.to_owned(),
                    config.chat.model.clone(),
                    emb.model.clone(),
                    timeout,
                )?
                .with_label("compatible"),
            )
        }
        #[cfg(feature = "mock")]
        ProviderKind::Mock => AnyProvider::Mock(codectx_llm::mock::MockProvider::default()),
    };
    tracing::info!(provider = %emb.provider, model = %emb.model, base_url, "embedding provider configured");
    Ok(provider)
}

/// Build the vector store named by `[store]`.
///
/// # Errors
///
/// Returns the store error if the Qdrant client cannot be created.
pub fn build_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.store.backend {
        StoreBackend::Qdrant => Arc::new(QdrantStore::new(&config.store.url)?),
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory vector store; the index is lost on exit");
            Arc::new(InMemoryVectorStore::new())
        }
    };
    Ok(store)
}

/// One workspace: orchestrator, query service and, once started, the watcher.
pub struct Engine {
    config: Config,
    provider: Arc<AnyProvider>,
    orchestrator: Arc<IndexingOrchestrator>,
    query: QueryService,
    updater: Option<IncrementalUpdater>,
    watcher: Option<IndexWatcher>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("orchestrator", &self.orchestrator)
            .field("query", &self.query)
            .field("watching", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Validate `config` and connect to the configured backends.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, an unreadable `root`, or a
    /// backend client that cannot be constructed.
    pub fn new(config: Config, root: &Path) -> Result<Self> {
        config.validate()?;
        let provider = build_provider(&config)?;
        let store = build_store(&config)?;
        Self::with_backends(config, root, provider, store)
    }

    /// Assemble an engine around already constructed backends.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Index`] if `root` is unreadable or an ignore pattern is invalid.
    pub fn with_backends(
        config: Config,
        root: &Path,
        provider: AnyProvider,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        let indexing = &config.indexing;
        let discovery = FileDiscovery::new(
            root,
            &IgnoreRules::new(indexing.ignore.clone()),
            indexing.max_file_bytes,
        )?;

        let provider = Arc::new(provider);
        let gateway = EmbeddingGateway::new(
            Arc::clone(&provider),
            GatewayConfig {
                batch_size: config.embedding.batch_size,
                max_retries: config.embedding.max_retries,
                backoff_base: Duration::from_millis(config.embedding.backoff_base_ms),
            },
        );
        let pipeline = Arc::new(FilePipeline::new(
            Arc::new(discovery),
            gateway,
            store,
            PipelineConfig {
                max_chunk_chars: indexing.max_chunk_chars,
                distance: config.store.distance,
            },
        ));

        let orchestrator = Arc::new(IndexingOrchestrator::new(
            Arc::clone(&pipeline),
            OrchestratorConfig {
                max_workers: indexing.max_workers,
                low_intensity: indexing.low_intensity,
                dispatch_delay: Duration::from_millis(indexing.dispatch_delay_ms),
                prune_stale: indexing.prune_stale,
                ..OrchestratorConfig::default()
            },
        ));

        let mut query = QueryService::for_pipeline(
            &pipeline,
            QueryConfig {
                overfetch_factor: config.query.overfetch_factor,
                score_threshold: config.query.score_threshold,
                snippet_max_chars: config.query.snippet_max_chars,
            },
        );
        if config.query.expand {
            query = query.with_expander(Arc::new(LlmQueryExpander::new(Arc::clone(&provider))));
        }
        if config.query.rerank {
            query = query.with_reranker(Arc::new(LlmReranker::new(Arc::clone(&provider))));
        }

        tracing::info!(
            root = %pipeline.discovery().root().display(),
            collection = pipeline.collection(),
            store = pipeline.store().name(),
            "engine ready"
        );

        Ok(Self {
            config,
            provider,
            orchestrator,
            query,
            updater: None,
            watcher: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<IndexingOrchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.orchestrator.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> SessionReport {
        self.orchestrator.status()
    }

    /// The incremental updater, once [`Engine::start_watching`] has run.
    #[must_use]
    pub fn updater(&self) -> Option<&IncrementalUpdater> {
        self.updater.as_ref()
    }

    /// Spawn the incremental updater and follow the workspace on disk.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start_watching(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let pipeline = Arc::clone(self.orchestrator.pipeline());
        let updater = IncrementalUpdater::spawn(
            Arc::clone(&pipeline),
            self.orchestrator.lease(),
            self.orchestrator.status_receiver(),
            Duration::from_millis(self.config.watch.debounce_ms),
        );
        let discovery = Arc::clone(pipeline.discovery());
        let watcher = IndexWatcher::start(discovery.root(), Arc::clone(&discovery), updater.clone())?;
        self.updater = Some(updater);
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Query the index; `max_results` falls back to `query.default_max_results`.
    pub async fn search(
        &self,
        text: &str,
        max_results: Option<usize>,
        include_content: bool,
    ) -> SearchResponse {
        let max_results = max_results.unwrap_or(self.config.query.default_max_results);
        self.query.search(text, max_results, include_content).await
    }

    pub async fn health(&self) -> HealthReport {
        let store = self.orchestrator.pipeline().store();
        let (vector_store, embedding_provider) = tokio::join!(
            probe(store.name(), PROBE_TIMEOUT, store.health_check()),
            probe("embedding", PROBE_TIMEOUT, self.provider.health_check()),
        );
        HealthReport::new(vector_store, embedding_provider)
    }

    /// Execute one host command. Failures come back as [`CommandResponse::Error`].
    pub async fn dispatch(&self, command: Command) -> CommandResponse {
        if let Err(e) = command.validate() {
            return CommandResponse::error(e);
        }
        match command {
            Command::Start => match self.orchestrator.start().await {
                Ok(session_id) => CommandResponse::Started { session_id },
                Err(e) => CommandResponse::error(e),
            },
            Command::Pause => match self.orchestrator.pause() {
                Ok(()) => CommandResponse::Paused,
                Err(e) => CommandResponse::error(e),
            },
            Command::Resume => match self.orchestrator.resume() {
                Ok(()) => CommandResponse::Resumed,
                Err(e) => CommandResponse::error(e),
            },
            Command::Stop => CommandResponse::Stopped {
                files_processed: self.orchestrator.stop().await,
            },
            Command::Query {
                text,
                max_results,
                include_content,
            } => CommandResponse::Results(self.search(&text, max_results, include_content).await),
            Command::Status => CommandResponse::Status(self.status()),
            Command::Health => CommandResponse::Health(self.health().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use codectx_index::SessionStatus;
    use codectx_llm::mock::MockProvider;

    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/auth.rs"),
            "pub fn verify_token(token: &str) -> bool {\n    !token.is_empty()\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/math.rs"),
            "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
        )
        .unwrap();
        dir
    }

    fn engine(dir: &Path, config: Config, mock: MockProvider) -> Engine {
        Engine::with_backends(
            config,
            dir,
            AnyProvider::Mock(mock),
            Arc::new(InMemoryVectorStore::new()),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_then_query_through_commands() {
        let dir = workspace();
        let engine = engine(dir.path(), Config::default(), MockProvider::new(32));

        let started = engine.dispatch(Command::Start).await;
        assert!(matches!(started, CommandResponse::Started { .. }), "{started:?}");
        let report = engine.orchestrator().wait().await;
        assert_eq!(report.status, SessionStatus::Completed);
        assert_eq!(report.processed_files, 2);

        let response = engine
            .dispatch(Command::Query {
                text: "verify_token".into(),
                max_results: Some(5),
                include_content: true,
            })
            .await;
        let CommandResponse::Results(results) = response else {
            panic!("unexpected response {response:?}");
        };
        assert!(results.error.is_none());
        assert_eq!(results.results.len(), 2);
        assert!(results.results.iter().all(|r| r.content.is_some()));
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_before_search() {
        let dir = workspace();
        let mock = MockProvider::new(8);
        let engine = engine(dir.path(), Config::default(), mock.clone());

        let response = engine
            .dispatch(Command::Query {
                text: "x".into(),
                max_results: Some(500),
                include_content: false,
            })
            .await;
        assert!(matches!(response, CommandResponse::Error { .. }));
        assert_eq!(mock.embed_calls(), 0);
    }

    #[tokio::test]
    async fn pause_without_session_is_an_error() {
        let dir = workspace();
        let engine = engine(dir.path(), Config::default(), MockProvider::new(8));
        assert!(matches!(
            engine.dispatch(Command::Pause).await,
            CommandResponse::Error { .. }
        ));
        assert!(matches!(
            engine.dispatch(Command::Status).await,
            CommandResponse::Status(SessionReport {
                status: SessionStatus::NotStarted,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn query_defaults_to_configured_max_results() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(
                dir.path().join(format!("m{i}.rs")),
                format!("fn item_{i}() -> u32 {{ {i} }}\n"),
            )
            .unwrap();
        }
        let mut config = Config::default();
        config.query.default_max_results = 2;
        config.indexing.max_workers = 2;
        let engine = engine(dir.path(), config, MockProvider::new(16));

        engine.orchestrator().start().await.unwrap();
        engine.orchestrator().wait().await;

        let response = engine.search("item", None, false).await;
        assert_eq!(response.results.len(), 2);
        assert!(response.results.iter().all(|r| r.content.is_none()));
    }

    #[tokio::test]
    async fn health_reports_each_component() {
        let dir = workspace();
        let mut mock = MockProvider::new(8);
        mock.healthy = false;
        let engine = engine(dir.path(), Config::default(), mock);

        let CommandResponse::Health(report) = engine.dispatch(Command::Health).await else {
            panic!("expected a health response");
        };
        assert!(report.vector_store.healthy);
        assert!(!report.embedding_provider.healthy);
        assert!(report.embedding_provider.error.is_some());
        assert!(!report.healthy);
    }

    #[test]
    fn memory_backend_needs_no_server() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        let store = build_store(&config).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn openai_without_key_is_a_config_error() {
        let mut config = Config::default();
        config.embedding.provider = ProviderKind::OpenAi;
        assert!(matches!(build_provider(&config), Err(CoreError::Config(_))));
    }

    #[test]
    fn compatible_provider_uses_configured_url() {
        let mut config = Config::default();
        config.embedding.provider = ProviderKind::Compatible;
        assert!(build_provider(&config).is_err());
        config.embedding.base_url = Some("http://localhost:8080/v1".into());
        assert!(matches!(build_provider(&config), Ok(AnyProvider::OpenAi(_))));
    }

    #[test]
    fn unreadable_root_fails_construction() {
        let err = Engine::with_backends(
            Config::default(),
            Path::new("/definitely/not/a/workspace"),
            AnyProvider::Mock(MockProvider::new(8)),
            Arc::new(InMemoryVectorStore::new()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Index(_)));
    }
}
