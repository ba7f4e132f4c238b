//! Qdrant adapter over `qdrant-client`.

use std::collections::{BTreeSet, HashMap};

use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance as QdrantDistance, FieldType, Filter, PointId, PointStruct, ScoredPoint,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::types::{Distance, FILE_PATH_KEY, QueryHit, VectorPoint};
use crate::vector_store::{BoxFuture, VectorStore};

const SCROLL_PAGE: u32 = 256;

#[derive(Clone)]
pub struct QdrantStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore").finish_non_exhaustive()
    }
}

fn to_qdrant_distance(d: Distance) -> QdrantDistance {
    match d {
        Distance::Cosine => QdrantDistance::Cosine,
        Distance::Dot => QdrantDistance::Dot,
    }
}

fn from_qdrant_distance(raw: i32) -> Option<Distance> {
    if raw == QdrantDistance::Cosine as i32 {
        Some(Distance::Cosine)
    } else if raw == QdrantDistance::Dot as i32 {
        Some(Distance::Dot)
    } else {
        None
    }
}

fn file_filter(file_path: &str) -> Filter {
    Filter::must([Condition::matches(FILE_PATH_KEY, file_path.to_owned())])
}

impl QdrantStore {
    /// Connect to the Qdrant gRPC endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the client cannot be built from the URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build()?;
        Ok(Self { client })
    }

    async fn check_existing(&self, collection: &str, dims: u64, distance: Distance) -> Result<()> {
        let info = self.client.collection_info(collection).await?;
        let params = info
            .result
            .and_then(|i| i.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);
        let Some(VectorsConfigKind::Params(params)) = params else {
            tracing::warn!(collection, "collection has no single-vector config, skipping shape check");
            return Ok(());
        };
        if params.size != dims {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_owned(),
                expected: dims,
                actual: params.size,
            });
        }
        match from_qdrant_distance(params.distance) {
            Some(actual) if actual != distance => Err(StoreError::DistanceMismatch {
                collection: collection.to_owned(),
                expected: distance,
                actual,
            }),
            Some(_) => Ok(()),
            None => Err(StoreError::Unavailable(format!(
                "collection {collection} uses unsupported distance {}",
                params.distance
            ))),
        }
    }

    /// Walk every point matching `filter`, page by page.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<Filter>,
        with_payload: bool,
        mut visit: impl FnMut(qdrant_client::qdrant::RetrievedPoint),
    ) -> Result<()> {
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .with_payload(with_payload)
                .with_vectors(false)
                .limit(SCROLL_PAGE);
            if let Some(f) = &filter {
                builder = builder.filter(f.clone());
            }
            if let Some(off) = offset.take() {
                builder = builder.offset(off);
            }

            let response = self.client.scroll(builder).await?;
            response.result.into_iter().for_each(&mut visit);

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => return Ok(()),
            }
        }
    }
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> Map<String, Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json_val = match v.kind? {
                Kind::StringValue(s) => Value::String(s),
                Kind::IntegerValue(i) => Value::Number(i.into()),
                Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(Value::Number)?,
                Kind::BoolValue(b) => Value::Bool(b),
                _ => return None,
            };
            Some((k, json_val))
        })
        .collect()
}

fn scored_point_to_hit(point: ScoredPoint) -> QueryHit {
    let payload = payload_to_json(point.payload);
    let file_path = payload
        .get(FILE_PATH_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    QueryHit {
        id: point_id_to_string(point.id),
        file_path,
        score: point.score,
        payload,
    }
}

fn to_point_struct(p: VectorPoint) -> Result<PointStruct> {
    let mut payload = p.payload;
    payload.insert(FILE_PATH_KEY.to_owned(), Value::String(p.file_path));
    let payload: HashMap<String, QdrantValue> = serde_json::from_value(Value::Object(payload))?;
    Ok(PointStruct::new(p.id, p.vector, payload))
}

impl VectorStore for QdrantStore {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "qdrant"
    }

    fn ensure_collection(
        &self,
        collection: &str,
        dims: u64,
        distance: Distance,
    ) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if self.client.collection_exists(&collection).await? {
                return self.check_existing(&collection, dims, distance).await;
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(dims, to_qdrant_distance(distance))),
                )
                .await?;
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(
                        &collection,
                        FILE_PATH_KEY,
                        FieldType::Keyword,
                    )
                    .wait(true),
                )
                .await?;
            tracing::info!(collection = %collection, dims, %distance, "created qdrant collection");
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool>> {
        let collection = collection.to_owned();
        Box::pin(async move { Ok(self.client.collection_exists(&collection).await?) })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if self.client.collection_exists(&collection).await? {
                self.client.delete_collection(&collection).await?;
            }
            Ok(())
        })
    }

    fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let points = points
                .into_iter()
                .map(to_point_struct)
                .collect::<Result<Vec<_>>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
                .await?;
            Ok(())
        })
    }

    fn delete_by_file_path(&self, collection: &str, file_path: &str) -> BoxFuture<'_, Result<()>> {
        let collection = collection.to_owned();
        let filter = file_filter(file_path);
        Box::pin(async move {
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(filter).wait(true))
                .await?;
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
            let response = self
                .client
                .search_points(SearchPointsBuilder::new(&collection, vector, top_k).with_payload(true))
                .await?;
            Ok(response.result.into_iter().map(scored_point_to_hit).collect())
        })
    }

    fn file_chunk_ids(
        &self,
        collection: &str,
        file_path: &str,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        let collection = collection.to_owned();
        let filter = file_filter(file_path);
        Box::pin(async move {
            let mut ids = Vec::new();
            self.scroll(&collection, Some(filter), false, |p| {
                ids.push(point_id_to_string(p.id));
            })
            .await?;
            ids.sort();
            Ok(ids)
        })
    }

    fn indexed_files(&self, collection: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut files = BTreeSet::new();
            self.scroll(&collection, None, true, |p| {
                if let Some(Kind::StringValue(path)) =
                    p.payload.get(FILE_PATH_KEY).and_then(|v| v.kind.clone())
                {
                    files.insert(path);
                }
            })
            .await?;
            Ok(files.into_iter().collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.client.health_check().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_url() {
        assert!(QdrantStore::new("http://localhost:6334").is_ok());
    }

    #[test]
    fn debug_hides_client() {
        let store = QdrantStore::new("http://localhost:6334").unwrap();
        assert!(format!("{store:?}").contains("QdrantStore"));
    }

    #[test]
    fn distance_roundtrips_through_qdrant_enum() {
        for d in [Distance::Cosine, Distance::Dot] {
            assert_eq!(from_qdrant_distance(to_qdrant_distance(d) as i32), Some(d));
        }
        assert_eq!(from_qdrant_distance(QdrantDistance::Euclid as i32), None);
    }

    #[test]
    fn point_struct_carries_file_path() {
        let mut payload = Map::new();
        payload.insert("start_line".into(), Value::from(3));
        let ps = to_point_struct(VectorPoint {
            id: "6f1c0a1e-7c5e-5d2a-9a8e-2f1b8f1d6c11".into(),
            file_path: "src/lib.rs".into(),
            vector: vec![0.1, 0.2],
            payload,
        })
        .unwrap();
        let fp = ps.payload.get(FILE_PATH_KEY).and_then(|v| v.kind.clone());
        assert_eq!(fp, Some(Kind::StringValue("src/lib.rs".into())));
        assert!(ps.payload.contains_key("start_line"));
    }

    #[test]
    fn scored_point_conversion_extracts_file_path() {
        let mut payload = HashMap::new();
        payload.insert(FILE_PATH_KEY.to_owned(), QdrantValue::from("a.rs".to_owned()));
        payload.insert("start_line".to_owned(), QdrantValue::from(7_i64));
        let point = ScoredPoint {
            id: Some(PointId::from("6f1c0a1e-7c5e-5d2a-9a8e-2f1b8f1d6c11".to_owned())),
            payload,
            score: 0.75,
            ..Default::default()
        };
        let hit = scored_point_to_hit(point);
        assert_eq!(hit.file_path, "a.rs");
        assert_eq!(hit.id, "6f1c0a1e-7c5e-5d2a-9a8e-2f1b8f1d6c11");
        assert_eq!(hit.payload_u64("start_line"), Some(7));
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant instance on localhost:6334"]
    async fn live_roundtrip() {
        let store = QdrantStore::new("http://localhost:6334").unwrap();
        let c = "codectx_live_test";
        store.delete_collection(c).await.unwrap();
        store.ensure_collection(c, 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                c,
                vec![VectorPoint {
                    id: "6f1c0a1e-7c5e-5d2a-9a8e-2f1b8f1d6c11".into(),
                    file_path: "a.rs".into(),
                    vector: vec![1.0, 0.0],
                    payload: Map::new(),
                }],
            )
            .await
            .unwrap();
        let hits = store.query(c, vec![1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].file_path, "a.rs");
        assert_eq!(store.indexed_files(c).await.unwrap(), vec!["a.rs"]);
        store.delete_by_file_path(c, "a.rs").await.unwrap();
        assert!(store.file_chunk_ids(c, "a.rs").await.unwrap().is_empty());
        assert!(matches!(
            store.ensure_collection(c, 3, Distance::Cosine).await,
            Err(StoreError::DimensionMismatch { .. })
        ));
        store.delete_collection(c).await.unwrap();
    }
}
