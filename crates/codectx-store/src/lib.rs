//! Vector storage for code chunks.
//!
//! [`VectorStore`] is the backend contract: collection lifecycle, upsert,
//! similarity query and delete-by-path. [`QdrantStore`] talks to a Qdrant
//! server, [`InMemoryVectorStore`] keeps everything in process.

pub mod error;
pub mod memory;
pub mod naming;
pub mod qdrant;
pub mod types;
pub mod vector_store;

pub use error::{Result, StoreError};
pub use memory::InMemoryVectorStore;
pub use naming::{collection_name_for, workspace_id_for};
pub use qdrant::QdrantStore;
pub use types::{Distance, FILE_PATH_KEY, QueryHit, VectorPoint};
pub use vector_store::{BoxFuture, VectorStore};
