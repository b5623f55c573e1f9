//! Retry wrapper shared by every external-engine call site.
//!
//! The policy is deliberately uniform: bounded attempts, fixed inter-attempt
//! delay, optional per-attempt deadline. Domain validation can feed a
//! feedback string into the next attempt through [`RetryableError::feedback`];
//! the attempt state is threaded explicitly through the loop so the wrapper
//! stays generic and the feedback logic lives at the call site.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Backoff policy for a resilient call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Must be >= 1.
    pub max_attempts: u32,
    /// Fixed pause between a failed attempt and the next.
    pub delay: Duration,
    /// Per-attempt deadline. When it elapses the in-flight future is dropped,
    /// which cancels it, and the attempt counts as failed.
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        debug_assert!(max_attempts >= 1);
        Self {
            max_attempts,
            delay,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// State handed to the operation on every attempt.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Feedback derived from the previous attempt's error, if any.
    pub feedback: Option<String>,
}

/// Errors that can amend the next attempt's request.
pub trait RetryableError {
    fn feedback(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Operation(E),
}

impl<E> RetryError<E> {
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(inner) => Some(inner),
            RetryError::TimedOut(_) => None,
        }
    }
}

/// Attempts `operation` up to `policy.max_attempts` times.
///
/// `on_retry` runs after every failed attempt except the last, before the
/// fixed delay. After the final failure the last error is returned unchanged;
/// callers decide whether to convert it into an empty-result fallback.
pub async fn call_with_retry<T, E, F, Fut, O>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: O,
) -> Result<T, RetryError<E>>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
    O: FnMut(u32, &RetryError<E>),
{
    debug_assert!(policy.max_attempts >= 1);

    let mut feedback: Option<String> = None;
    let mut last_error: Option<RetryError<E>> = None;

    for number in 1..=policy.max_attempts {
        let attempt = Attempt {
            number,
            feedback: feedback.clone(),
        };

        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                Ok(result) => result.map_err(RetryError::Operation),
                Err(_) => Err(RetryError::TimedOut(limit)),
            },
            None => operation(attempt).await.map_err(RetryError::Operation),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                if let RetryError::Operation(inner) = &error {
                    if let Some(text) = inner.feedback() {
                        feedback = Some(text);
                    }
                }
                if number < policy.max_attempts {
                    on_retry(number, &error);
                    tokio::time::sleep(policy.delay).await;
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.expect("at least one attempt executed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    #[error("boom: {message}")]
    struct FlakyError {
        message: String,
        feedback: Option<String>,
    }

    impl RetryableError for FlakyError {
        fn feedback(&self) -> Option<String> {
            self.feedback.clone()
        }
    }

    fn plain_error(message: &str) -> FlakyError {
        FlakyError {
            message: message.to_string(),
            feedback: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let retries_seen = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let attempts_in = attempts.clone();
        let retries_in = retries_seen.clone();
        let result = call_with_retry(
            &policy,
            move |_attempt| {
                let attempts = attempts_in.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(plain_error("transient"))
                    } else {
                        Ok(n)
                    }
                }
            },
            move |_, _| {
                retries_in.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two failed attempts, two observer invocations.
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let retries_seen = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let started = Instant::now();

        let attempts_in = attempts.clone();
        let retries_in = retries_seen.clone();
        let result: Result<u32, _> = call_with_retry(
            &policy,
            move |_attempt| {
                let attempts = attempts_in.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(plain_error("always"))
                }
            },
            move |_, _| {
                retries_in.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Observer never fires after the final attempt.
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
        // Two inter-attempt pauses of 250ms each.
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn per_attempt_timeout_fails_that_attempt_only() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy =
            RetryPolicy::new(2, Duration::from_millis(10)).with_timeout(Duration::from_millis(50));

        let attempts_in = attempts.clone();
        let result = call_with_retry(
            &policy,
            move |attempt| {
                let attempts = attempts_in.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt.number == 1 {
                        // Never resolves within the deadline; the timeout
                        // drops this future and moves on.
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    Ok::<_, FlakyError>("late bloomer")
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.expect("second attempt succeeds"), "late bloomer");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_from_rejection_reaches_the_next_attempt() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<Option<String>>::new()));
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let seen_in = seen.clone();
        let result = call_with_retry(
            &policy,
            move |attempt| {
                let seen = seen_in.clone();
                async move {
                    seen.lock().expect("mutex").push(attempt.feedback.clone());
                    if attempt.number == 1 {
                        Err(FlakyError {
                            message: "rejected".to_string(),
                            feedback: Some("keep replacements short".to_string()),
                        })
                    } else {
                        Ok(attempt.number)
                    }
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 2);
        let seen = seen.lock().expect("mutex");
        assert_eq!(seen.as_slice()[0], None);
        assert_eq!(seen.as_slice()[1].as_deref(), Some("keep replacements short"));
    }
}
