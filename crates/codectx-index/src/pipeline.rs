//! Per-file read → chunk → embed → store primitive.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use codectx_llm::EmbeddingGateway;
use codectx_store::{Distance, VectorPoint, VectorStore, collection_name_for, workspace_id_for};
use serde_json::Value;

use crate::chunker::chunk_file;
use crate::discovery::FileDiscovery;
use crate::error::Result;
use crate::languages::detect_language;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_chunk_chars: usize,
    pub distance: Distance,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 6000,
            distance: Distance::Cosine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// `chunks` points written; `replaced` when stale chunks were deleted first.
    Indexed { chunks: usize, replaced: bool },
    /// No chunks (unsupported or blank); any previous chunks were removed.
    Empty,
}

/// Shared by the orchestrator and the incremental updater so both write a
/// file the same way: one embedding call and one upsert per file.
pub struct FilePipeline {
    discovery: Arc<FileDiscovery>,
    gateway: EmbeddingGateway,
    store: Arc<dyn VectorStore>,
    collection: String,
    workspace_id: String,
    config: PipelineConfig,
}

impl std::fmt::Debug for FilePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePipeline")
            .field("root", &self.discovery.root())
            .field("collection", &self.collection)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl FilePipeline {
    #[must_use]
    pub fn new(
        discovery: Arc<FileDiscovery>,
        gateway: EmbeddingGateway,
        store: Arc<dyn VectorStore>,
        config: PipelineConfig,
    ) -> Self {
        let root = discovery.root();
        Self {
            collection: collection_name_for(root),
            workspace_id: workspace_id_for(root),
            discovery,
            gateway,
            store,
            config,
        }
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<FileDiscovery> {
        &self.discovery
    }

    #[must_use]
    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Create the workspace collection sized to the embedding model.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the dimension probe fails, or the store
    /// error (including a dimension/distance mismatch).
    pub async fn ensure_collection(&self) -> Result<u64> {
        let dims = self.gateway.probe_dimensions().await? as u64;
        self.store
            .ensure_collection(&self.collection, dims, self.config.distance)
            .await?;
        Ok(dims)
    }

    /// Re-index one file.
    ///
    /// Old chunks are deleted only when the new chunk id set differs, and only
    /// after embedding succeeded, so a failed embed leaves the file as it was.
    ///
    /// # Errors
    ///
    /// Returns read, parse, provider or store errors; callers classify them
    /// with [`crate::IndexError::is_session_fatal`].
    pub async fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        let rel = self.discovery.relative_path(path);
        let source = tokio::fs::read_to_string(path).await?;
        let chunks = chunk_file(&source, &rel, detect_language(path), &self.workspace_id)?;

        let existing = self.store.file_chunk_ids(&self.collection, &rel).await?;
        if chunks.is_empty() {
            if !existing.is_empty() {
                self.store.delete_by_file_path(&self.collection, &rel).await?;
            }
            return Ok(FileOutcome::Empty);
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| c.embedding_text(self.config.max_chunk_chars))
            .collect();
        let vectors = self.gateway.embed_chunks(&ids, &texts).await?;

        let new_ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let replaced = !existing.is_empty()
            && (existing.len() != new_ids.len()
                || existing.iter().any(|id| !new_ids.contains(id.as_str())));
        if replaced {
            self.store.delete_by_file_path(&self.collection, &rel).await?;
        }

        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, ev)| {
                let mut payload = chunk.payload();
                payload.insert("provider_id".into(), Value::from(ev.provider_id));
                payload.insert("model_name".into(), Value::from(ev.model_name));
                payload.insert("dims".into(), Value::from(ev.dims));
                VectorPoint {
                    id: chunk.id,
                    file_path: chunk.file_path,
                    vector: ev.vector,
                    payload,
                }
            })
            .collect();
        let count = points.len();
        self.store.upsert(&self.collection, points).await?;

        tracing::debug!(file = %rel, chunks = count, replaced, "file indexed");
        Ok(FileOutcome::Indexed {
            chunks: count,
            replaced,
        })
    }

    /// Drop every chunk of `path` from the collection.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let rel = self.discovery.relative_path(path);
        self.store.delete_by_file_path(&self.collection, &rel).await?;
        tracing::debug!(file = %rel, "file removed from index");
        Ok(())
    }

    /// Delete chunks of indexed files that are not in `present` (relative paths).
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn prune_missing(&self, present: &HashSet<String>) -> Result<usize> {
        let mut pruned = 0;
        for file in self.store.indexed_files(&self.collection).await? {
            if !present.contains(&file) {
                self.store.delete_by_file_path(&self.collection, &file).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "removed chunks of deleted files");
        }
        Ok(pruned)
    }
}
