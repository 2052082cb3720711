//! Bounded retry with jittered backoff for transient store contention.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::RegistrationError;

/// Policy for the internal retry of retryable store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
    /// Jitter factor in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(80),
            jitter: 0.5,
        }
    }
}

/// Runs `operation` until it succeeds, fails terminally, is cancelled, or
/// exhausts the policy.
///
/// Only failures for which [`RegistrationError::is_retryable`] holds re-run
/// the operation; exhausting the policy escalates the last such failure to
/// [`RegistrationError::Fatal`]. Each attempt and each backoff sleep races
/// against `cancel`; a triggered token abandons the in-flight attempt
/// (dropping its store session, which rolls the transaction back) and
/// returns [`RegistrationError::Cancelled`].
///
/// # Errors
///
/// Returns the operation's terminal error, `Cancelled` on cancellation, or
/// `Fatal` when retries are exhausted.
pub async fn run_with_retries<F, Fut, T>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RegistrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RegistrationError>>,
{
    if cancel.is_cancelled() {
        return Err(RegistrationError::Cancelled);
    }

    let mut backoff = policy.initial_backoff;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RegistrationError::Cancelled),
            result = operation() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts.max(1) {
            return Err(RegistrationError::Fatal(format!(
                "contention persisted after {attempt} attempts: {err}"
            )));
        }

        let delay = jittered(backoff, policy.jitter);
        tracing::debug!(
            attempt,
            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying after transient store contention"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RegistrationError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }

        backoff = (backoff * 2).min(policy.max_backoff);
    }
}

/// Spreads a backoff across `[dur * (1 - factor), dur * (1 + factor)]` so
/// concurrent losers do not retry in lockstep.
fn jittered(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }
    let factor = factor.clamp(0.0, 1.0);
    let base = dur.as_secs_f64();
    let range = (base * (1.0 - factor))..=(base * (1.0 + factor));
    Duration::from_secs_f64(rand::rng().random_range(range))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_runs_once() {
        // Arrange
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        // Act
        let result = run_with_retries(test_policy(), &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RegistrationError>("admitted")
            }
        })
        .await;

        // Assert
        assert_eq!(result.unwrap(), "admitted");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_re_run_until_success() {
        // Arrange
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        // Act
        let result = run_with_retries(test_policy(), &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(RegistrationError::Retryable("40001".into()))
                } else {
                    Ok("admitted")
                }
            }
        })
        .await;

        // Assert
        assert_eq!(result.unwrap(), "admitted");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate_to_fatal() {
        // Arrange
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        // Act
        let result = run_with_retries(test_policy(), &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RegistrationError::Retryable("still contended".into()))
            }
        })
        .await;

        // Assert
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            RegistrationError::Fatal(message) => {
                assert!(message.contains("3 attempts"));
            }
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_re_run() {
        // Arrange
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        // Act
        let result = run_with_retries(test_policy(), &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RegistrationError::Validation("seats must be positive".into()))
            }
        })
        .await;

        // Assert
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            RegistrationError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        // Arrange
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Act
        let result = run_with_retries(test_policy(), &cancel, || async {
            Ok::<_, RegistrationError>("never reached")
        })
        .await;

        // Assert
        assert_eq!(result.unwrap_err(), RegistrationError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_interrupts_the_sleep() {
        // Arrange: first attempt fails instantly, backoff is far longer
        // than the cancellation delay.
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(10),
            jitter: 0.0,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();

        // Act
        let result = run_with_retries(policy, &cancel, || async {
            Err::<(), _>(RegistrationError::Retryable("contended".into()))
        })
        .await;

        // Assert
        assert_eq!(result.unwrap_err(), RegistrationError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
