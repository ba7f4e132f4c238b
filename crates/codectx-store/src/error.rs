use crate::types::Distance;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    #[error("collection {collection} has {actual}-dimensional vectors, expected {expected}")]
    DimensionMismatch {
        collection: String,
        expected: u64,
        actual: u64,
    },

    #[error("collection {collection} uses {actual} distance, expected {expected}")]
    DistanceMismatch {
        collection: String,
        expected: Distance,
        actual: Distance,
    },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("payload conversion failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StoreError {
    /// Mismatches are raised while ensuring a collection and cannot be fixed by retrying.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::DistanceMismatch { .. }
        )
    }
}

impl From<qdrant_client::QdrantError> for StoreError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
