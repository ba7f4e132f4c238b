use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("authentication rejected by {provider}")]
    Auth { provider: String },

    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("embedding batch mismatch: sent {sent} texts, received {received} vectors")]
    BatchMismatch { sent: usize, received: usize },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether the gateway should retry the request after a backoff.
    ///
    /// Authentication failures are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Unavailable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub(crate) fn unavailable(provider: &str, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            provider: provider.to_owned(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_and_unavailable_are_retryable() {
        let rl = LlmError::RateLimited {
            provider: "openai".into(),
            retry_after: None,
        };
        assert!(rl.is_retryable());
        assert!(LlmError::unavailable("ollama", "connection refused").is_retryable());
    }

    #[test]
    fn auth_is_not_retryable() {
        let err = LlmError::Auth {
            provider: "openai".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_auth());
    }

    #[test]
    fn batch_mismatch_message() {
        let err = LlmError::BatchMismatch {
            sent: 3,
            received: 2,
        };
        assert_eq!(
            err.to_string(),
            "embedding batch mismatch: sent 3 texts, received 2 vectors"
        );
        assert!(!err.is_retryable());
    }
}
