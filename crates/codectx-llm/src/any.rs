#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

/// Provider selected from configuration at startup.
#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    /// Hosted OpenAI and every OpenAI-compatible endpoint.
    OpenAi(OpenAiProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl AnyProvider {
    /// Ping the backing service without embedding anything.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the service is unreachable or rejects credentials.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        delegate_provider!(self, |p| p.health_check().await)
    }
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }

    fn embedding_model(&self) -> &str {
        delegate_provider!(self, |p| p.embedding_model())
    }

    fn max_batch_size(&self) -> usize {
        delegate_provider!(self, |p| p.max_batch_size())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_provider!(self, |p| p.embed_batch(texts).await)
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        delegate_provider!(self, |p| p.chat(messages).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_variant_delegates_metadata() {
        let p = AnyProvider::Ollama(OllamaProvider::new(
            "http://localhost:11434",
            "llama3.2".into(),
            "nomic-embed-text".into(),
        ));
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.embedding_model(), "nomic-embed-text");
        assert_eq!(p.max_batch_size(), 32);
    }

    #[test]
    fn openai_variant_keeps_label() {
        let inner = OpenAiProvider::new(
            String::new(),
            "http://localhost:8000/v1".into(),
            "m".into(),
            "bge-small".into(),
            std::time::Duration::from_secs(5),
        )
        .unwrap()
        .with_label("compatible");
        let p = AnyProvider::OpenAi(inner);
        assert_eq!(p.name(), "compatible");
        assert_eq!(p.embedding_model(), "bge-small");
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn mock_variant_embeds() {
        let p = AnyProvider::Mock(MockProvider::new(8));
        let vectors = p.embed_batch(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 8);
        assert!(p.health_check().await.is_ok());
    }
}
