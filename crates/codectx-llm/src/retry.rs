use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// Upper bound on the shift applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Parse the `Retry-After` header value as whole seconds.
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let val = response.headers().get("retry-after")?;
    let secs = val.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Exponential backoff: `base * 2^attempt`, capped at `2^MAX_BACKOFF_SHIFT`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Delay before the next attempt. A provider's `Retry-After` is honoured up to
/// the largest backoff step.
pub(crate) fn retry_delay(err: &LlmError, base: Duration, attempt: u32) -> Duration {
    match err {
        LlmError::RateLimited {
            retry_after: Some(d),
            ..
        } => (*d).min(backoff_delay(base, MAX_BACKOFF_SHIFT)),
        _ => backoff_delay(base, attempt),
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
///
/// 429 becomes `RateLimited` (keeping any `Retry-After`), 401/403 become `Auth`,
/// 5xx become `Unavailable`. Successful responses are returned untouched.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimited {
            provider: provider.to_owned(),
            retry_after: retry_after(&response),
        });
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(provider, %status, "provider request failed: {body}");

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(LlmError::Auth {
            provider: provider.to_owned(),
        });
    }
    if status.is_server_error() {
        return Err(LlmError::unavailable(provider, format!("status {status}")));
    }
    Err(LlmError::Other(format!(
        "{provider} request failed (status {status})"
    )))
}

/// Run `f` until it succeeds, fails with a non-retryable error, or `max_retries`
/// retries are exhausted. Waits as [`retry_delay`] decides.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retryable error.
pub(crate) async fn with_retry<T, F, Fut>(
    provider_name: &str,
    max_retries: u32,
    base: Duration,
    mut f: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = retry_delay(&e, base, attempt);
                tracing::warn!(
                    provider = provider_name,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "embedding request failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
