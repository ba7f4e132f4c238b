use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::any::AnyProvider;
use crate::error::LlmError;
use crate::provider::LlmProvider;
use crate::retry::with_retry;

const DIMENSION_PROBE: &str = "dimension probe";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound on texts per request; the provider's own limit also applies.
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// A vector tagged with the chunk it embeds and the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub provider_id: String,
    pub model_name: String,
    pub dims: usize,
}

/// Single entry point for turning text into vectors.
///
/// One provider is chosen per workspace at construction time. The gateway
/// splits input into provider-sized batches, keeps output aligned 1:1 with
/// input and retries transient failures.
#[derive(Debug, Clone)]
pub struct EmbeddingGateway {
    provider: Arc<AnyProvider>,
    config: GatewayConfig,
    dims: Arc<OnceCell<usize>>,
}

impl EmbeddingGateway {
    #[must_use]
    pub fn new(provider: Arc<AnyProvider>, config: GatewayConfig) -> Self {
        Self {
            provider,
            config,
            dims: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<AnyProvider> {
        &self.provider
    }

    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.provider.name()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.provider.embedding_model()
    }

    fn effective_batch_size(&self) -> usize {
        self.config
            .batch_size
            .min(self.provider.max_batch_size())
            .max(1)
    }

    /// Embed `texts`, returning one vector per input in input order.
    ///
    /// # Errors
    ///
    /// Returns the provider error once retries are exhausted, `Auth` immediately,
    /// or `BatchMismatch` when the provider returns the wrong number of vectors.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.effective_batch_size()) {
            let vectors = with_retry(
                self.provider.name(),
                self.config.max_retries,
                self.config.backoff_base,
                || self.provider.embed_batch(batch),
            )
            .await?;
            if vectors.len() != batch.len() {
                return Err(LlmError::BatchMismatch {
                    sent: batch.len(),
                    received: vectors.len(),
                });
            }
            out.extend(vectors);
        }
        tracing::debug!(
            provider = self.provider.name(),
            texts = texts.len(),
            "embedded batch"
        );
        Ok(out)
    }

    /// # Errors
    ///
    /// See [`Self::embed`].
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self.embed(&[text.to_owned()]).await?;
        vectors.pop().ok_or(LlmError::EmptyResponse {
            provider: self.provider.name().to_owned(),
        })
    }

    /// Embed chunk texts and tag each vector with its chunk id and model metadata.
    ///
    /// # Errors
    ///
    /// See [`Self::embed`]. `chunk_ids` and `texts` must have the same length,
    /// otherwise `BatchMismatch` is returned without calling the provider.
    pub async fn embed_chunks(
        &self,
        chunk_ids: &[String],
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, LlmError> {
        if chunk_ids.len() != texts.len() {
            return Err(LlmError::BatchMismatch {
                sent: chunk_ids.len(),
                received: texts.len(),
            });
        }
        let vectors = self.embed(texts).await?;
        Ok(chunk_ids
            .iter()
            .zip(vectors)
            .map(|(id, vector)| EmbeddingVector {
                chunk_id: id.clone(),
                dims: vector.len(),
                vector,
                provider_id: self.provider_id().to_owned(),
                model_name: self.model().to_owned(),
            })
            .collect())
    }

    /// Width of the vectors produced by the configured model.
    ///
    /// Embeds a fixed probe string on first call and caches the result.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the probe fails or yields an empty vector.
    pub async fn probe_dimensions(&self) -> Result<usize, LlmError> {
        self.dims
            .get_or_try_init(|| async {
                let v = self.embed_one(DIMENSION_PROBE).await?;
                if v.is_empty() {
                    return Err(LlmError::EmptyResponse {
                        provider: self.provider.name().to_owned(),
                    });
                }
                tracing::info!(
                    provider = self.provider.name(),
                    model = self.model(),
                    dims = v.len(),
                    "probed embedding dimensions"
                );
                Ok(v.len())
            })
            .await
            .copied()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::{MockFailure, MockProvider};

    fn gateway(mock: MockProvider, batch_size: usize) -> EmbeddingGateway {
        EmbeddingGateway::new(
            Arc::new(AnyProvider::Mock(mock)),
            GatewayConfig {
                batch_size,
                max_retries: 2,
                backoff_base: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn embed_preserves_order_across_batches() {
        let mock = MockProvider::new(16);
        let gw = gateway(mock.clone(), 3);
        let texts: Vec<String> = (0..10).map(|i| format!("text number {i}")).collect();
        let vectors = gw.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 10);
        for (text, v) in texts.iter().zip(&vectors) {
            assert_eq!(v, &mock.vector_for(text));
        }
        assert_eq!(mock.embed_calls(), 4);
    }

    #[tokio::test]
    async fn batch_size_is_capped_by_provider() {
        let mock = MockProvider::new(4);
        let gw = gateway(mock.clone(), 1000);
        let texts: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        gw.embed(&texts).await.unwrap();
        // mock accepts 16 per request
        assert_eq!(mock.embed_calls(), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mock = MockProvider::new(4);
        mock.push_failures([MockFailure::RateLimited, MockFailure::Unavailable]);
        let gw = gateway(mock.clone(), 8);
        let vectors = gw.embed(&["a".into()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(mock.embed_calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mock = MockProvider::new(4);
        mock.push_failures([MockFailure::Unavailable; 5]);
        let gw = gateway(mock.clone(), 8);
        let err = gw.embed(&["a".into()]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable { .. }));
        assert_eq!(mock.embed_calls(), 3);
    }

    #[tokio::test]
    async fn auth_is_not_retried() {
        let mock = MockProvider::new(4);
        mock.push_failures([MockFailure::Auth]);
        let gw = gateway(mock.clone(), 8);
        assert!(gw.embed(&["a".into()]).await.unwrap_err().is_auth());
        assert_eq!(mock.embed_calls(), 1);
    }

    #[tokio::test]
    async fn probe_dimensions_is_cached() {
        let mock = MockProvider::new(24);
        let gw = gateway(mock.clone(), 8);
        assert_eq!(gw.probe_dimensions().await.unwrap(), 24);
        assert_eq!(gw.clone().probe_dimensions().await.unwrap(), 24);
        assert_eq!(mock.embed_calls(), 1);
    }

    #[tokio::test]
    async fn embed_chunks_tags_metadata() {
        let gw = gateway(MockProvider::new(8), 8);
        let out = gw
            .embed_chunks(&["id-1".into(), "id-2".into()], &["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(out[1].chunk_id, "id-2");
        assert_eq!(out[0].provider_id, "mock");
        assert_eq!(out[0].model_name, "mock-embed");
        assert_eq!(out[0].dims, 8);
    }

    #[tokio::test]
    async fn embed_chunks_rejects_misaligned_input() {
        let mock = MockProvider::new(8);
        let gw = gateway(mock.clone(), 8);
        let err = gw.embed_chunks(&["id".into()], &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::BatchMismatch { .. }));
        assert_eq!(mock.embed_calls(), 0);
    }
}
