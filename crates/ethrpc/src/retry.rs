//! Retry-with-exponential-backoff for transient failures.
//!
//! Every outbound RPC and HTTP call of the indexers goes through
//! [`with_retry`]. What counts as transient is the callee's business,
//! expressed through [`Retryable`]; the wrapper only handles pacing.

use {
    alloy::transports::{RpcError, TransportErrorKind},
    rand::Rng,
    std::{future::Future, time::Duration},
};

/// Classification of an error as worth another attempt.
///
/// Transient: socket hang-ups, connection resets, timeouts, DNS failures,
/// 5xx and 429 responses. Everything else (other 4xx, decode errors) fails
/// immediately.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RpcError<TransportErrorKind> {
    fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport(kind) => match kind {
                TransportErrorKind::HttpError(http) => {
                    http.status == 429 || (500..600).contains(&http.status)
                }
                // connect failures, hang-ups, missing batch responses
                _ => true,
            },
            RpcError::ErrorResp(payload) => {
                // -32005 is the conventional "limit exceeded" code
                payload.code == -32005
            }
            RpcError::NullResp => true,
            _ => false,
        }
    }
}

impl Retryable for alloy::contract::Error {
    fn is_retryable(&self) -> bool {
        match self {
            alloy::contract::Error::TransportError(err) => err.is_retryable(),
            // ABI/decoding mismatches never fix themselves
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`: `base * 2^attempt` plus up to
    /// 250ms of jitter, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
        (exponential + jitter).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, returns a non-retryable error, or the
/// attempt budget is exhausted. `context` names the operation for log
/// attribution; the error of the final attempt is surfaced.
pub async fn with_retry<T, E, F, Fut>(
    context: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = config.delay(attempt);
                tracing::warn!(
                    context,
                    attempt,
                    ?delay,
                    ?err,
                    "transient error, retrying"
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
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering},
    };

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = with_retry("test", quick(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry("test", quick(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: true }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry("test", quick(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: false }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert!(config.delay(0) >= Duration::from_secs(1));
        assert!(config.delay(2) >= Duration::from_secs(4));
        assert!(config.delay(10) <= Duration::from_secs(10));
    }
}
