//! Test-only mock provider with deterministic embeddings.

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// Failure the mock returns instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    RateLimited,
    Auth,
    Unavailable,
}

impl MockFailure {
    fn into_error(self) -> LlmError {
        match self {
            Self::RateLimited => LlmError::RateLimited {
                provider: "mock".into(),
                retry_after: None,
            },
            Self::Auth => LlmError::Auth {
                provider: "mock".into(),
            },
            Self::Unavailable => LlmError::unavailable("mock", "injected failure"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    embed_calls: AtomicUsize,
    embedded_texts: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hashes words into a fixed number of buckets, so texts sharing words get
/// similar vectors. Clones share counters and queues.
#[derive(Debug, Clone)]
pub struct MockProvider {
    dims: usize,
    overrides: Arc<Mutex<Vec<(String, Vec<f32>)>>>,
    failures: Arc<Mutex<VecDeque<MockFailure>>>,
    fail_on: Option<(String, MockFailure)>,
    responses: Arc<Mutex<VecDeque<String>>>,
    counters: Arc<Counters>,
    pub default_response: String,
    pub fail_chat: bool,
    pub healthy: bool,
    /// Milliseconds to sleep inside every embedding call.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockProvider {
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            overrides: Arc::default(),
            failures: Arc::default(),
            fail_on: None,
            responses: Arc::default(),
            counters: Arc::default(),
            default_response: "mock response".into(),
            fail_chat: false,
            healthy: true,
            delay_ms: 0,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_responses(self, responses: Vec<String>) -> Self {
        *lock(&self.responses) = responses.into();
        self
    }

    /// Any text containing `needle` embeds to `vector` instead of the hashed one.
    #[must_use]
    pub fn with_vector_for(self, needle: impl Into<String>, vector: Vec<f32>) -> Self {
        lock(&self.overrides).push((needle.into(), vector));
        self
    }

    /// Every batch containing a text with `marker` fails with `failure`.
    #[must_use]
    pub fn fail_on(mut self, marker: impl Into<String>, failure: MockFailure) -> Self {
        self.fail_on = Some((marker.into(), failure));
        self
    }

    /// Queue failures returned by the next embedding calls, one per call.
    pub fn push_failures(&self, failures: impl IntoIterator<Item = MockFailure>) {
        lock(&self.failures).extend(failures);
    }

    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.counters.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embedded_texts(&self) -> usize {
        self.counters.embedded_texts.load(Ordering::SeqCst)
    }

    /// Highest number of embedding calls observed running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Deterministic embedding for `text`, ignoring failure injection.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some((_, v)) = lock(&self.overrides)
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
        {
            return v.clone();
        }

        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            #[allow(clippy::cast_possible_truncation)]
            let idx = (h % self.dims as u64) as usize;
            v[idx] += if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    #[allow(clippy::unused_async)]
    pub async fn health_check(&self) -> Result<(), LlmError> {
        if self.healthy {
            Ok(())
        } else {
            Err(LlmError::unavailable("mock", "marked unhealthy"))
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LlmProvider for MockProvider {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn embedding_model(&self) -> &str {
        "mock-embed"
    }

    fn max_batch_size(&self) -> usize {
        16
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let _guard = InFlight::enter(&self.counters);
        self.counters.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let queued = lock(&self.failures).pop_front();
        if let Some(failure) = queued {
            return Err(failure.into_error());
        }
        if let Some((marker, failure)) = &self.fail_on
            && texts.iter().any(|t| t.contains(marker.as_str()))
        {
            return Err(failure.into_error());
        }

        self.counters
            .embedded_texts
            .fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        if self.fail_chat {
            return Err(LlmError::Other("mock chat error".into()));
        }
        Ok(lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}
