//! Semantic search: embed the query, over-fetch chunks, collapse them per file.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use codectx_llm::EmbeddingGateway;
use codectx_store::{QueryHit, VectorStore};
use serde::{Deserialize, Serialize};

use crate::chunker::truncate_chars;
use crate::pipeline::FilePipeline;
use crate::rerank::{QueryExpander, Reranker, apply_order};

#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Raw hits fetched per requested result, leaving room for deduplication.
    pub overfetch_factor: usize,
    /// Hits scoring below this are discarded before grouping.
    pub score_threshold: Option<f32>,
    pub snippet_max_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 5,
            score_threshold: None,
            snippet_max_chars: 1200,
        }
    }
}

/// One file matching a query, scored by its best chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub score: f32,
    pub best_snippet: String,
    pub contributing_chunk_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u64>,
    /// Full file text, only when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Search outcome; backend failures land in `error` with empty `results`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Collapse raw hits into one result per file.
///
/// A file's score is its best hit's score and its snippet and line range come
/// from that hit. Results are ordered by score descending, ties by path.
#[must_use]
pub fn group_by_file(hits: Vec<QueryHit>, snippet_max_chars: usize) -> Vec<SearchResult> {
    let mut by_file: HashMap<String, SearchResult> = HashMap::new();
    for hit in hits {
        let snippet = truncate_chars(hit.payload_str("content").unwrap_or_default(), snippet_max_chars);
        match by_file.get_mut(&hit.file_path) {
            Some(result) => {
                if hit.score > result.score {
                    result.score = hit.score;
                    snippet.clone_into(&mut result.best_snippet);
                    result.start_line = hit.payload_u64("start_line");
                    result.end_line = hit.payload_u64("end_line");
                }
                result.contributing_chunk_ids.push(hit.id);
            }
            None => {
                let result = SearchResult {
                    file_path: hit.file_path.clone(),
                    score: hit.score,
                    best_snippet: snippet.to_owned(),
                    start_line: hit.payload_u64("start_line"),
                    end_line: hit.payload_u64("end_line"),
                    contributing_chunk_ids: vec![hit.id],
                    content: None,
                };
                by_file.insert(hit.file_path, result);
            }
        }
    }

    let mut results: Vec<SearchResult> = by_file.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    results
}

/// Read side of a workspace index.
pub struct QueryService {
    gateway: EmbeddingGateway,
    store: Arc<dyn VectorStore>,
    collection: String,
    root: PathBuf,
    config: QueryConfig,
    expander: Option<Arc<dyn QueryExpander>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .field("expander", &self.expander.is_some())
            .field("reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

impl QueryService {
    #[must_use]
    pub fn new(
        gateway: EmbeddingGateway,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        root: impl Into<PathBuf>,
        config: QueryConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            collection: collection.into(),
            root: root.into(),
            config,
            expander: None,
            reranker: None,
        }
    }

    /// Query the same collection the pipeline writes to.
    #[must_use]
    pub fn for_pipeline(pipeline: &FilePipeline, config: QueryConfig) -> Self {
        Self::new(
            pipeline.gateway().clone(),
            Arc::clone(pipeline.store()),
            pipeline.collection(),
            pipeline.discovery().root(),
            config,
        )
    }

    #[must_use]
    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Return up to `max_results` files relevant to `query`.
    ///
    /// Never fails: provider and store errors are reported in
    /// [`SearchResponse::error`]. Expansion and re-ranking failures fall back to
    /// the plain query and the score order.
    pub async fn search(&self, query: &str, max_results: usize, include_content: bool) -> SearchResponse {
        if max_results == 0 {
            return SearchResponse::default();
        }

        let text = match &self.expander {
            Some(expander) => match expander.expand(query).await {
                Ok(expanded) => expanded,
                Err(e) => {
                    tracing::warn!("query expansion failed, using original query: {e}");
                    query.to_owned()
                }
            },
            None => query.to_owned(),
        };

        let vector = match self.gateway.embed_one(&text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("query embedding failed: {e}");
                return SearchResponse::failed(e);
            }
        };

        let top_k = max_results.saturating_mul(self.config.overfetch_factor.max(1));
        let top_k = u64::try_from(top_k).unwrap_or(u64::MAX);
        let hits = match self.store.query(&self.collection, vector, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(collection = %self.collection, "vector search failed: {e}");
                return SearchResponse::failed(e);
            }
        };
        let raw = hits.len();
        let hits: Vec<QueryHit> = match self.config.score_threshold {
            Some(min) => hits.into_iter().filter(|h| h.score >= min).collect(),
            None => hits,
        };

        let mut results = group_by_file(hits, self.config.snippet_max_chars);
        results.truncate(max_results);

        if include_content {
            for result in &mut results {
                let Some(path) = workspace_file(&self.root, &result.file_path) else {
                    tracing::warn!(
                        file = %result.file_path,
                        "result path escapes the workspace, content not read"
                    );
                    continue;
                };
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => result.content = Some(content),
                    Err(e) => tracing::warn!(file = %result.file_path, "cannot read result file: {e}"),
                }
            }
        }

        if let Some(reranker) = &self.reranker
            && results.len() > 1
        {
            match reranker.rerank(query, &results).await {
                Ok(order) => results = apply_order(results, &order),
                Err(e) => tracing::warn!("re-ranking failed, keeping score order: {e}"),
            }
        }

        tracing::debug!(raw, files = results.len(), "search finished");
        SearchResponse {
            results,
            error: None,
        }
    }
}

/// Resolve a stored relative path under `root`. Absolute paths and `..` or `.`
/// components are rejected.
fn workspace_file(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    let plain = rel.components().next().is_some()
        && rel.components().all(|c| matches!(c, Component::Normal(_)));
    plain.then(|| root.join(rel))
}
