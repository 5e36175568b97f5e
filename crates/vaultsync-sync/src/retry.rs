//! Retry with exponential backoff and failure classification
//!
//! Remote adapters are expected to wrap their failures in [`RemoteError`].
//! Anything else is classified from the error message, which keeps the
//! engine usable with adapters that only return plain `anyhow` errors.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use vaultsync_core::config::RetryConfig;
use vaultsync_core::ports::RemoteError;

/// How the engine should react to a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, 5xx or rate limiting; worth another attempt
    Transient,
    /// The access token was rejected
    Unauthorized,
    /// Remote storage is full
    Quota,
    /// The remote item no longer exists
    NotFound,
    /// Rejected request or local failure; retrying will not help
    Permanent,
}

pub(crate) fn remote_error(err: &anyhow::Error) -> Option<&RemoteError> {
    err.downcast_ref::<RemoteError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<RemoteError>()))
}

/// Classify a failure, preferring a typed [`RemoteError`] anywhere in the chain
pub fn classify(err: &anyhow::Error) -> FailureKind {
    if let Some(remote) = remote_error(err) {
        return match remote {
            RemoteError::Network(_) | RemoteError::Server { .. } | RemoteError::RateLimited { .. } => {
                FailureKind::Transient
            }
            RemoteError::Unauthorized => FailureKind::Unauthorized,
            RemoteError::QuotaExceeded => FailureKind::Quota,
            RemoteError::NotFound(_) => FailureKind::NotFound,
            RemoteError::Validation { .. } => FailureKind::Permanent,
        };
    }

    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("401") || msg.contains("unauthorized") {
        FailureKind::Unauthorized
    } else if msg.contains("storagequotaexceeded")
        || msg.contains("quota exceeded")
        || msg.contains("insufficient storage")
    {
        FailureKind::Quota
    } else if is_transient_error(err) {
        FailureKind::Transient
    } else if msg.contains("404") || msg.contains("not found") {
        FailureKind::NotFound
    } else {
        FailureKind::Permanent
    }
}

/// Message heuristic for transient failures
///
/// Transient errors include:
/// - Network errors (connection refused, timeout, DNS)
/// - Rate limiting (HTTP 429)
/// - Server errors (HTTP 5xx)
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    if let Some(remote) = remote_error(err) {
        return remote.is_transient();
    }

    let err_str = format!("{err:#}").to_lowercase();

    if err_str.contains("network")
        || err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("timed out")
        || err_str.contains("dns")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
    {
        return true;
    }

    if err_str.contains("429")
        || err_str.contains("too many requests")
        || err_str.contains("rate limit")
    {
        return true;
    }

    err_str.contains("500")
        || err_str.contains("502")
        || err_str.contains("503")
        || err_str.contains("504")
        || err_str.contains("server error")
}

/// Delay before retry number `attempt` (0-based), doubling up to the cap
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let ms = config.base_delay_ms.saturating_mul(factor).min(config.max_delay_ms);
    Duration::from_millis(ms)
}

/// Run `f` until it succeeds, fails permanently, or runs out of attempts
///
/// Only transient failures are retried. A rate-limit response carrying a
/// retry-after hint waits at least that long (still capped). On exhaustion
/// the last error is returned; [`classify`] on it still reports
/// [`FailureKind::Transient`], which is how callers tell exhaustion apart
/// from a permanent failure.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt + 1 < attempts && is_transient_error(&err) => {
                let mut delay = backoff_delay(config, attempt);
                if let Some(RemoteError::RateLimited {
                    retry_after_secs: Some(secs),
                }) = remote_error(&err)
                {
                    let hinted = Duration::from_secs(*secs)
                        .min(Duration::from_millis(config.max_delay_ms));
                    delay = delay.max(hinted);
                }
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }

    #[test]
    fn test_classify_typed_errors() {
        let err = anyhow::Error::new(RemoteError::QuotaExceeded).context("upload a.md");
        assert_eq!(classify(&err), FailureKind::Quota);
        let err = anyhow::Error::new(RemoteError::Validation {
            status: 400,
            message: "bad name".into(),
        });
        assert_eq!(classify(&err), FailureKind::Permanent);
        assert_eq!(
            classify(&anyhow::Error::new(RemoteError::Unauthorized)),
            FailureKind::Unauthorized
        );
        assert_eq!(
            classify(&anyhow::Error::new(RemoteError::NotFound("x".into()))),
            FailureKind::NotFound
        );
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            classify(&anyhow::anyhow!("connection reset by peer")),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&anyhow::anyhow!("HTTP 503 Service Unavailable")),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&anyhow::anyhow!("HTTP 401: token expired")),
            FailureKind::Unauthorized
        );
        assert_eq!(
            classify(&anyhow::anyhow!("item not found")),
            FailureKind::NotFound
        );
        assert_eq!(
            classify(&anyhow::anyhow!("permission denied")),
            FailureKind::Permanent
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let c = config();
        assert_eq!(backoff_delay(&c, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&c, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&c, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&c, 3), Duration::from_millis(5000));
        assert_eq!(backoff_delay(&c, 40), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&config(), "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow::Error::new(RemoteError::Network("timeout".into())))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_transient_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: anyhow::Result<()> = with_retry(&config(), "down", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::Error::new(RemoteError::Server {
                status: 502,
                message: "bad gateway".into(),
            }))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(classify(&err), FailureKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: anyhow::Result<()> = with_retry(&config(), "reject", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::Error::new(RemoteError::Validation {
                status: 400,
                message: "invalid".into(),
            }))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
