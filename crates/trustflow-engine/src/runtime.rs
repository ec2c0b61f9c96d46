//! The durable runtime contract.
//!
//! Activities are the only suspension points of a workflow. The runtime
//! wraps each activity call in a bounded per-attempt timeout and a capped
//! exponential-backoff retry loop; the activities' own job is to be safely
//! retryable (idempotent or side-effect-free on retry), never to implement
//! the retry loop themselves.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts; `None` retries without bound (outcome recording).
    pub max_attempts: Option<u32>,
    /// First backoff interval.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// The default bounded policy.
    pub fn standard() -> Self {
        Self {
            max_attempts: Some(5),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Retry forever — reserved for outcome recording.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::standard()
        }
    }

    /// Backoff before the given retry (attempt numbering starts at 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let backoff = self.initial_backoff.mul_f64(factor.max(1.0));
        backoff.min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    fn allows_another(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Timeout + retry settings for one activity call.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retry policy across attempts.
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::standard(),
        }
    }
}

/// Executes activities with timeouts and retries.
///
/// Stateless by design: crash-safety comes from the activities being
/// idempotent against the stores, not from runtime bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct DurableRuntime;

impl DurableRuntime {
    pub fn new() -> Self {
        Self
    }

    /// Run `f` until it succeeds, its error is terminal, or the policy's
    /// attempts are exhausted.
    ///
    /// Each attempt is bounded by `opts.timeout`; a timed-out attempt
    /// counts as a retryable failure. Non-retryable errors surface
    /// immediately without further attempts.
    pub async fn run_activity<F, Fut, T>(
        &self,
        activity: &'static str,
        opts: &ActivityOptions,
        f: F,
    ) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(opts.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::ActivityTimeout {
                    activity,
                    timeout_secs: opts.timeout.as_secs(),
                }),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(activity, attempt, "activity succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && opts.retry.allows_another(attempt) => {
                    let backoff = opts.retry.backoff_for(attempt);
                    warn!(
                        activity,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "activity failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(EngineError::RetriesExhausted {
                        activity,
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_opts(max_attempts: Option<u32>) -> ActivityOptions {
        ActivityOptions {
            timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
                multiplier: 2.0,
            },
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: Some(10),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(450),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        // Capped at the ceiling.
        assert_eq!(policy.backoff_for(4), Duration::from_millis(450));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(450));
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let runtime = DurableRuntime::new();
        let result: EngineResult<i32> = runtime
            .run_activity("test", &fast_opts(Some(3)), || async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let runtime = DurableRuntime::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result = runtime
            .run_activity("test", &fast_opts(Some(5)), move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::Cognition {
                            reason: "upstream hiccup".into(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_bounded_attempts() {
        let runtime = DurableRuntime::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: EngineResult<()> = runtime
            .run_activity("test", &fast_opts(Some(3)), move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Effect {
                        action_type: "send_email".into(),
                        reason: "smtp down".into(),
                    })
                }
            })
            .await;

        match result.unwrap_err() {
            EngineError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let runtime = DurableRuntime::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: EngineResult<()> = runtime
            .run_activity("test", &fast_opts(Some(5)), move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Config {
                        reason: "bad".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), EngineError::Config { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_attempts_are_retried() {
        let runtime = DurableRuntime::new();
        let calls = Arc::new(AtomicU32::new(0));

        let opts = ActivityOptions {
            timeout: Duration::from_millis(20),
            ..fast_opts(Some(3))
        };

        let calls_in = Arc::clone(&calls);
        let result = runtime
            .run_activity("test", &opts, move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        // First attempt hangs past the timeout.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok(1)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unbounded_policy_keeps_retrying() {
        let runtime = DurableRuntime::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result = runtime
            .run_activity("record_outcome", &fast_opts(None), move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    // Far beyond any bounded default.
                    if calls.fetch_add(1, Ordering::SeqCst) < 20 {
                        Err(EngineError::Store(trustflow_store::StoreError::TaskJoin(
                            "store offline".into(),
                        )))
                    } else {
                        Ok("recorded")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recorded");
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }
}
