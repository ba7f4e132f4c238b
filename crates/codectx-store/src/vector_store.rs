use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::types::{Distance, QueryHit, VectorPoint};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backend contract shared by every vector database adapter.
///
/// Object safe so the engine can hold an `Arc<dyn VectorStore>` chosen from config.
pub trait VectorStore: Send + Sync {
    /// Short backend name used in logs and health reports.
    fn name(&self) -> &str;

    /// Create `collection` if absent.
    ///
    /// Fails with `DimensionMismatch`/`DistanceMismatch` when it already exists
    /// with a different shape.
    fn ensure_collection(
        &self,
        collection: &str,
        dims: u64,
        distance: Distance,
    ) -> BoxFuture<'_, Result<()>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<()>>;

    /// Insert or overwrite points; the point id is the chunk id.
    fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<()>>;

    /// Remove every point whose payload `file_path` equals `file_path`.
    fn delete_by_file_path(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<()>>;

    /// Up to `top_k` hits ordered by descending similarity.
    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>>>;

    /// Ids of the points currently stored for `file_path`.
    fn file_chunk_ids(&self, collection: &str, file_path: &str)
    -> BoxFuture<'_, Result<Vec<String>>>;

    /// Distinct file paths present in `collection`, sorted.
    fn indexed_files(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>>>;

    fn health_check(&self) -> BoxFuture<'_, Result<()>>;
}
