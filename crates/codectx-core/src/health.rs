//! Liveness probes for the vector store and the embedding provider.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Probes that take longer than this count as failed.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Both components are healthy.
    pub healthy: bool,
    pub vector_store: ComponentHealth,
    pub embedding_provider: ComponentHealth,
}

impl HealthReport {
    #[must_use]
    pub fn new(vector_store: ComponentHealth, embedding_provider: ComponentHealth) -> Self {
        Self {
            healthy: vector_store.healthy && embedding_provider.healthy,
            vector_store,
            embedding_provider,
        }
    }
}

/// Run `check` under `timeout`, recording how long it took.
pub async fn probe<F, E>(component: &str, timeout: Duration, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, check).await;
    let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {}ms", timeout.as_millis())),
    };
    if let Some(ref e) = error {
        tracing::warn!(component, response_time_ms, "health check failed: {e}");
    } else {
        tracing::debug!(component, response_time_ms, "health check passed");
    }

    ComponentHealth {
        healthy: error.is_none(),
        response_time_ms,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_probe_is_healthy() {
        let health = probe("store", PROBE_TIMEOUT, async { Ok::<(), String>(()) }).await;
        assert!(health.healthy);
        assert!(health.error.is_none());
    }

    #[tokio::test]
    async fn failing_probe_reports_error() {
        let health = probe("store", PROBE_TIMEOUT, async { Err::<(), _>("connection refused") }).await;
        assert!(!health.healthy);
        assert_eq!(health.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), String>(())
        };
        let health = probe("provider", Duration::from_millis(50), slow).await;
        assert!(!health.healthy);
        assert!(health.error.unwrap().contains("timed out"));
    }

    #[test]
    fn overall_flag_requires_both() {
        let up = ComponentHealth {
            healthy: true,
            response_time_ms: 3,
            error: None,
        };
        let down = ComponentHealth {
            healthy: false,
            response_time_ms: 5000,
            error: Some("timed out".into()),
        };
        assert!(HealthReport::new(up.clone(), up.clone()).healthy);
        assert!(!HealthReport::new(up, down).healthy);
    }
}
