//! Embedding and chat provider abstraction.
//!
//! Providers (a local Ollama server, OpenAI or any OpenAI-compatible endpoint)
//! implement [`LlmProvider`]. [`gateway::EmbeddingGateway`] sits in front of the
//! configured provider and owns batching, ordering and retry policy.

pub mod any;
pub mod error;
pub mod gateway;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use any::AnyProvider;
pub use error::{LlmError, Result};
pub use gateway::{EmbeddingGateway, EmbeddingVector, GatewayConfig};
pub use provider::{LlmProvider, Message, Role};
