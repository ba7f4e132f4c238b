//! Code indexing engine and semantic search.
//!
//! Files found by [`FileDiscovery`] are split into AST chunks, embedded
//! through an [`codectx_llm::EmbeddingGateway`] and written to a
//! [`codectx_store::VectorStore`] collection private to the workspace.
//! [`IndexingOrchestrator`] runs full, pausable sessions over a worker pool;
//! [`IncrementalUpdater`] keeps the collection current between sessions and
//! [`QueryService`] answers natural-language queries with one result per file.

pub mod chunker;
pub mod discovery;
pub mod error;
pub mod events;
pub mod languages;
pub mod orchestrator;
pub mod pipeline;
pub mod query;
pub mod rerank;
pub mod session;
pub mod updater;
pub mod watcher;

pub use chunker::{CodeChunk, SymbolType, chunk_file};
pub use discovery::{FileDiscovery, IgnoreRules, SkippedFile};
pub use error::{IndexError, Result};
pub use events::ProgressEvent;
pub use languages::{Lang, detect_language, is_indexable};
pub use orchestrator::{IndexingOrchestrator, OrchestratorConfig};
pub use pipeline::{FileOutcome, FilePipeline, PipelineConfig};
pub use query::{QueryConfig, QueryService, SearchResponse, SearchResult, group_by_file};
pub use rerank::{LlmQueryExpander, LlmReranker, QueryExpander, Reranker};
pub use session::{SessionReport, SessionStatus, SkippedEntry};
pub use updater::{ChangeEvent, ChangeKind, IncrementalUpdater};
pub use watcher::IndexWatcher;
