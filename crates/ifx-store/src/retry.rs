//! Shared resilience policy for store reads, store writes and bus publishes.
//!
//! One configurable wrapper instead of three hand-rolled loops: bounded
//! attempts, exponential backoff capped at a maximum delay, optional jitter,
//! a per-attempt timeout, and an on-retry hook that lets the caller
//! reconnect the underlying session before the next attempt.

use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::SessionError;

/// Retry/backoff/timeout settings for one operation class.
///
/// Each resilient component (store-read, store-write, publish) carries its
/// own policy so they can be tuned independently.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the operation fails.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to the exponential backoff.
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
    /// Per-attempt timeout; an attempt that exceeds it counts as a
    /// communication failure.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter: true,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Internal outcome of a retried operation, mapped by the callers onto the
/// public error taxonomy (`StoreUnavailable` / `PublishUnavailable`).
#[derive(Debug)]
pub enum RetryError {
    /// Shutdown was requested during a wait or between attempts.
    Cancelled,
    /// All attempts failed with communication-class errors.
    Exhausted { attempts: u32, last: SessionError },
    /// A non-communication error; retrying would not help.
    Fatal { attempts: u32, error: SessionError },
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (1-based).
    ///
    /// The cap applies to the exponential term; jitter of up to 50% is then
    /// added on top so concurrent retriers stay desynchronized even after
    /// the backoff saturates.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base_ms = self
            .initial_delay
            .as_millis()
            .min(u64::MAX as u128) as u64;
        let cap_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let mut delay_ms = base_ms.saturating_mul(1u64 << exp).min(cap_ms);
        if self.jitter && delay_ms > 0 {
            delay_ms += rand::thread_rng().gen_range(0..=delay_ms / 2);
        }
        Duration::from_millis(delay_ms)
    }

    /// Run `op` under this policy.
    ///
    /// Communication-class failures (including per-attempt timeouts) are
    /// retried after a cancellation-aware backoff sleep, with `on_retry`
    /// invoked before each new attempt so the caller can reconnect the
    /// session. Any other session error fails immediately.
    pub async fn execute<T, F, R>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
        mut on_retry: R,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> BoxFuture<'static, Result<T, SessionError>> + Send,
        R: FnMut() -> BoxFuture<'static, Result<(), SessionError>> + Send,
        T: Send,
    {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let failure = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_communication() => e,
                Ok(Err(e)) => {
                    return Err(RetryError::Fatal {
                        attempts: attempts + 1,
                        error: e,
                    })
                }
                Err(_) => SessionError::Communication(format!(
                    "attempt timed out after {:?}",
                    self.timeout
                )),
            };

            attempts += 1;
            if attempts >= self.max_retries {
                warn!(
                    operation,
                    attempts,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts,
                    last: failure,
                });
            }

            let delay = self.delay_for(attempts);
            debug!(
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Transient failure, backing off before reconnect"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = on_retry().await {
                warn!(operation, error = %e, "Reconnect attempt failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = fast_policy(10);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(30), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy(10)
        };
        for _ in 0..50 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(20));
            assert!(d <= Duration::from_millis(30));
        }
    }

    #[test]
    fn jitter_still_varies_once_backoff_saturates() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast_policy(10)
        };
        let cap = Duration::from_millis(100);
        let samples: Vec<Duration> = (0..50).map(|_| policy.delay_for(30)).collect();
        for d in &samples {
            assert!(*d >= cap);
            assert!(*d <= cap + cap / 2);
        }
        assert!(samples.iter().any(|d| *d > cap));
    }

    #[tokio::test]
    async fn transient_failures_then_success_reconnects_per_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let reconnects = Arc::new(AtomicU32::new(0));
        let policy = fast_policy(10);
        let cancel = CancellationToken::new();

        let calls_op = calls.clone();
        let reconnects_hook = reconnects.clone();
        let result: Result<u32, _> = policy
            .execute(
                "test-read",
                &cancel,
                move || {
                    let calls = calls_op.clone();
                    Box::pin(async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                            Err(SessionError::Communication("down".into()))
                        } else {
                            Ok(7)
                        }
                    })
                },
                move || {
                    let reconnects = reconnects_hook.clone();
                    Box::pin(async move {
                        reconnects.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                },
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(reconnects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_failure_exhausts_after_exactly_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_policy(4);
        let cancel = CancellationToken::new();

        let calls_op = calls.clone();
        let result: Result<(), _> = policy
            .execute(
                "test-read",
                &cancel,
                move || {
                    let calls = calls_op.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(SessionError::Communication("down".into()))
                    })
                },
                || Box::pin(async { Ok(()) }),
            )
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_policy(10);
        let cancel = CancellationToken::new();

        let calls_op = calls.clone();
        let result: Result<(), _> = policy
            .execute(
                "test-write",
                &cancel,
                move || {
                    let calls = calls_op.clone();
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(SessionError::Protocol("bad response".into()))
                    })
                },
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits_before_first_attempt() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..fast_policy(10)
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = policy
            .execute(
                "test-read",
                &cancel,
                || Box::pin(async { Err(SessionError::Communication("down".into())) }),
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_sleep_aborts_promptly() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..fast_policy(10)
        };
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                policy
                    .execute(
                        "test-read",
                        &cancel,
                        || {
                            Box::pin(async {
                                Err::<(), _>(SessionError::Communication("down".into()))
                            })
                        },
                        || Box::pin(async { Ok(()) }),
                    )
                    .await
            })
        };

        // Let the first attempt fail and the backoff sleep begin, then
        // cancel mid-sleep. The 60s delay must not be waited out.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancelled_at = std::time::Instant::now();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("cancellation must abort the backoff wait")
            .unwrap();

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    }
}
