use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::types::{Distance, QueryHit, VectorPoint};
use crate::vector_store::{BoxFuture, VectorStore};

struct StoredPoint {
    file_path: String,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

struct InMemoryCollection {
    dims: u64,
    distance: Distance,
    points: HashMap<String, StoredPoint>,
}

/// Process-local backend with the same semantics as the Qdrant adapter.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, InMemoryCollection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, InMemoryCollection>> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of points in `collection`, zero when it does not exist.
    #[must_use]
    pub fn point_count(&self, collection: &str) -> usize {
        self.read().get(collection).map_or(0, |c| c.points.len())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn not_found(collection: &str) -> StoreError {
    StoreError::CollectionNotFound(collection.to_owned())
}

impl VectorStore for InMemoryVectorStore {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "memory"
    }

    fn ensure_collection(
        &self,
        collection: &str,
        dims: u64,
        distance: Distance,
    ) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.write();
            if let Some(existing) = cols.get(&collection) {
                if existing.dims != dims {
                    return Err(StoreError::DimensionMismatch {
                        collection,
                        expected: dims,
                        actual: existing.dims,
                    });
                }
                if existing.distance != distance {
                    return Err(StoreError::DistanceMismatch {
                        collection,
                        expected: distance,
                        actual: existing.distance,
                    });
                }
                return Ok(());
            }
            cols.insert(
                collection,
                InMemoryCollection {
                    dims,
                    distance,
                    points: HashMap::new(),
                },
            );
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool>> {
        let collection = collection.to_owned();
        Box::pin(async move { Ok(self.read().contains_key(&collection)) })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.write().remove(&collection);
            Ok(())
        })
    }

    fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.write();
            let col = cols.get_mut(&collection).ok_or_else(|| not_found(&collection))?;
            if let Some(bad) = points
                .iter()
                .find(|p| p.vector.len() as u64 != col.dims)
            {
                return Err(StoreError::DimensionMismatch {
                    collection,
                    expected: col.dims,
                    actual: bad.vector.len() as u64,
                });
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        file_path: p.file_path,
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn delete_by_file_path(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let mut cols = self.write();
            let col = cols.get_mut(&collection).ok_or_else(|| not_found(&collection))?;
            col.points.retain(|_, p| p.file_path != file_path);
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        top_k: u64,
    ) -> BoxFuture<'_, Result<Vec<QueryHit>>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read();
            let col = cols.get(&collection).ok_or_else(|| not_found(&collection))?;

            let mut hits: Vec<QueryHit> = col
                .points
                .iter()
                .map(|(id, sp)| QueryHit {
                    id: id.clone(),
                    file_path: sp.file_path.clone(),
                    score: col.distance.score(&vector, &sp.vector),
                    payload: sp.payload.clone(),
                })
                .collect();

            hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
            hits.truncate(usize::try_from(top_k).unwrap_or(usize::MAX));
            Ok(hits)
        })
    }

    fn file_chunk_ids(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        let collection = collection.to_owned();
        let file_path = file_path.to_owned();
        Box::pin(async move {
            let cols = self.read();
            let col = cols.get(&collection).ok_or_else(|| not_found(&collection))?;
            let mut ids: Vec<String> = col
                .points
                .iter()
                .filter(|(_, p)| p.file_path == file_path)
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn indexed_files(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.read();
            let col = cols.get(&collection).ok_or_else(|| not_found(&collection))?;
            let files: BTreeSet<&str> = col.points.values().map(|p| p.file_path.as_str()).collect();
            Ok(files.into_iter().map(str::to_owned).collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
