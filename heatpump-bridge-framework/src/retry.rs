//! Bounded retry of fallible async operations.
//!
//! A [`RetryPolicy`] holds a fixed schedule of delays. Each call walks its own
//! copy of the schedule left to right: a retryable failure consumes the next
//! delay and tries again, a non-retryable failure is returned immediately, and
//! running out of delays ends in [`RetryError::TooManyTries`].
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use heatpump_bridge_framework::{RetryPolicy, retry};
//!
//! let read = retry(
//!     RetryPolicy::new([Duration::ZERO, Duration::from_millis(500)]),
//!     |e: &DeviceError| e.is_transient(),
//!     |register: Register| async move { connection.read(&register).await },
//! );
//!
//! let value = read.call(register).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Outcome of an operation that exhausted or bypassed its retry schedule.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error that is not retryable.
    #[error(transparent)]
    Failed(E),

    /// Every attempt failed with a retryable error.
    #[error("Too many tries ({attempts} attempts): {source}")]
    TooManyTries {
        /// Number of attempts made.
        attempts: usize,
        /// Error returned by the last attempt.
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Whether the schedule was exhausted.
    pub fn is_too_many_tries(&self) -> bool {
        matches!(self, RetryError::TooManyTries { .. })
    }

    /// The underlying error of the last attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Failed(e) => e,
            RetryError::TooManyTries { source, .. } => source,
        }
    }

    /// Consume and return the underlying error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Failed(e) => e,
            RetryError::TooManyTries { source, .. } => source,
        }
    }
}

/// A fixed delay schedule.
///
/// An empty schedule means a single attempt. A zero delay retries without
/// suspending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Create a policy from a delay schedule.
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// The configured delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of attempts one call can make.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `operation` under this policy.
    ///
    /// `is_retryable` classifies failures; only those it accepts consume a delay.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        is_retryable: P,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut delays = self.delays.iter().copied();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Failed(e)),
                Err(e) => e,
            };

            tracing::warn!(
                attempt = attempts,
                remaining = delays.len(),
                error = %error,
                "Attempt failed"
            );

            let Some(delay) = delays.next() else {
                return Err(RetryError::TooManyTries {
                    attempts,
                    source: error,
                });
            };

            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Sleeping before retry");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// An operation wrapped with a retry policy.
///
/// Calls take the same argument as the wrapped operation and return its
/// output, with failures lifted into [`RetryError`].
#[derive(Debug, Clone)]
pub struct Retry<F, P> {
    policy: RetryPolicy,
    is_retryable: P,
    operation: F,
}

/// Wrap `operation` so that every call is retried according to `policy`.
pub fn retry<F, P>(policy: RetryPolicy, is_retryable: P, operation: F) -> Retry<F, P> {
    Retry {
        policy,
        is_retryable,
        operation,
    }
}

impl<F, P> Retry<F, P> {
    /// The policy applied to each call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke the wrapped operation with a fresh copy of the schedule.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, RetryError<E>>
    where
        A: Clone,
        E: std::error::Error + 'static,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.policy
            .run(&self.is_retryable, || (self.operation)(args.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Error, PartialEq)]
    enum TestError {
        #[error("timeout")]
        Timeout,
        #[error("rejected")]
        Rejected,
    }

    fn transient(e: &TestError) -> bool {
        matches!(e, TestError::Timeout)
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new([Duration::ZERO]);

        let result = policy
            .run(transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(7)
            })
            .await;

        assert_eq!(assert_ok!(result), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_zero_delays_mean_three_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new([Duration::ZERO, Duration::ZERO]);

        let result = policy
            .run(transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Timeout)
            })
            .await;

        let err = assert_err!(result);
        assert!(err.is_too_many_tries());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RetryError::TooManyTries { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source, TestError::Timeout);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_fails_once() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new([Duration::ZERO, Duration::ZERO]);

        let result = policy
            .run(transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Rejected)
            })
            .await;

        let err = assert_err!(result);
        assert!(!err.is_too_many_tries());
        assert_eq!(err.into_inner(), TestError::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_schedule_single_attempt() {
        let calls = AtomicUsize::new(0);

        let result = RetryPolicy::none()
            .run(transient, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Timeout)
            })
            .await;

        assert!(assert_err!(result).is_too_many_tries());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new([Duration::ZERO, Duration::ZERO, Duration::ZERO]);

        let result = policy
            .run(transient, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Timeout)
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(assert_ok!(result), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_are_slept() {
        let policy = RetryPolicy::new([Duration::from_secs(1), Duration::from_secs(3)]);
        let start = tokio::time::Instant::now();

        let result = policy
            .run(transient, || async { Err::<(), _>(TestError::Timeout) })
            .await;

        assert!(assert_err!(result).is_too_many_tries());
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_wrapped_calls_get_fresh_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let op = {
            let calls = calls.clone();
            let seen = seen.clone();
            move |arg: &'static str| {
                let calls = calls.clone();
                let seen = seen.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    seen.lock().unwrap().push(arg);
                    Err::<(), _>(TestError::Timeout)
                }
            }
        };

        let wrapped = retry(RetryPolicy::new([Duration::ZERO]), transient, op);

        assert!(wrapped.call("a").await.unwrap_err().is_too_many_tries());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(wrapped.call("b").await.unwrap_err().is_too_many_tries());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        assert_eq!(*seen.lock().unwrap(), vec!["a", "a", "b", "b"]);
    }

    #[test]
    fn test_policy_accessors() {
        let policy = RetryPolicy::new(vec![Duration::ZERO, Duration::from_millis(500)]);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delays().len(), 2);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
