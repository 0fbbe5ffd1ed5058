// src/provider/retry.rs — Backoff for transient provider failures
//
// Sits below the generator: one generator call may turn into several HTTP
// requests here, but the generator only ever sees the final outcome.
// Only errors marked retriable (5xx, timeouts, 429) are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ModelInfo, ModelProvider};
use crate::infra::errors::CodeLoopError;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread applied around each delay, as a fraction of it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based). A server-provided
    /// Retry-After hint replaces the computed backoff.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint + Duration::from_millis(100);
        }
        let doubled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX));
        let capped = doubled.min(self.max_delay);
        capped.mul_f64(spread(retry, self.jitter))
    }
}

/// Stable pseudo-random factor in [1 - jitter, 1 + jitter] per retry number.
fn spread(retry: u32, jitter: f64) -> f64 {
    let unit = f64::from(retry.wrapping_mul(0x9E37_79B1)) / f64::from(u32::MAX);
    1.0 + jitter * (2.0 * unit - 1.0)
}

fn retry_after(error: &CodeLoopError) -> Option<Duration> {
    match error {
        CodeLoopError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Wraps a provider and retries its retriable failures.
pub struct RetryProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.inner.models()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CodeLoopError> {
        let mut retry = 0;
        loop {
            let err = match self.inner.chat(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if !err.is_retriable() || retry >= self.policy.max_retries {
                return Err(err);
            }

            let wait = self.policy.backoff(retry, retry_after(&err));
            tracing::warn!(
                provider = self.inner.id(),
                retry = retry + 1,
                of = self.policy.max_retries,
                wait_ms = wait.as_millis() as u64,
                "{}",
                err
            );
            tokio::time::sleep(wait).await;
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{StopReason, TokenUsage};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers "ok" after `failures` failures of the given kind.
    struct Unsteady {
        failures: u32,
        retriable: bool,
        calls: AtomicU32,
    }

    impl Unsteady {
        fn new(failures: u32, retriable: bool) -> Arc<Self> {
            Arc::new(Self {
                failures,
                retriable,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelProvider for Unsteady {
        fn id(&self) -> &str {
            "unsteady"
        }
        fn name(&self) -> &str {
            "Unsteady"
        }
        fn models(&self) -> Vec<ModelInfo> {
            vec![]
        }
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, CodeLoopError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(CodeLoopError::Provider {
                    provider: "unsteady".into(),
                    message: "HTTP 502".into(),
                    retriable: self.retriable,
                });
            }
            Ok(ChatResponse {
                content: "ok".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn instant(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0, None), Duration::from_secs(1));
        assert_eq!(policy.backoff(1, None), Duration::from_secs(2));
        assert_eq!(policy.backoff(3, None), Duration::from_secs(8));
        assert_eq!(policy.backoff(10, None), Duration::from_secs(20));
        assert_eq!(policy.backoff(40, None), Duration::from_secs(20));
    }

    #[test]
    fn test_backoff_prefers_retry_after_hint() {
        let d = RetryPolicy::default().backoff(2, Some(Duration::from_secs(7)));
        assert_eq!(d, Duration::from_millis(7_100));
    }

    #[test]
    fn test_spread_stays_in_band() {
        for retry in 0..32 {
            let f = spread(retry, 0.2);
            assert!((0.8..=1.2).contains(&f), "factor {f} out of band");
        }
    }

    #[test]
    fn test_retry_after_only_for_positive_hints() {
        let limited = |ms| CodeLoopError::RateLimited {
            provider: "anthropic".into(),
            retry_after_ms: ms,
        };
        assert_eq!(retry_after(&limited(1500)), Some(Duration::from_millis(1500)));
        assert_eq!(retry_after(&limited(0)), None);
        assert_eq!(retry_after(&CodeLoopError::NoProvider), None);
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let inner = Unsteady::new(2, true);
        let provider = RetryProvider::with_policy(inner.clone(), instant(3));
        let resp = provider.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_after_retry_budget() {
        let inner = Unsteady::new(10, true);
        let provider = RetryProvider::with_policy(inner.clone(), instant(1));
        assert!(provider.chat(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let inner = Unsteady::new(1, false);
        let provider = RetryProvider::with_policy(inner.clone(), instant(3));
        assert!(provider.chat(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls(), 1);
    }
}
