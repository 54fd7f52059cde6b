//! Retry with exponential backoff and jitter.
//!
//! Delays start at [`RetryPolicy::initial`] and double on every attempt; a
//! random jitter of up to a third of the current delay is added. An
//! operation aborts the loop by returning [`Attempt::Stop`].

use backon::{BackoffBuilder, ExponentialBuilder};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upper bound for a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Outcome of a failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Try again after a backoff.
    Retry(E),
    /// Give up now and report the error as is.
    Stop(E),
}

impl<E> Attempt<E> {
    /// Classify an error with a retryability predicate.
    pub fn classify(err: E, retryable: impl FnOnce(&E) -> bool) -> Self {
        if retryable(&err) {
            Self::Retry(err)
        } else {
            Self::Stop(err)
        }
    }
}

/// Why a retried operation failed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation asked to stop.
    Stopped(E),
    /// Every attempt failed; carries the last error.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },
    /// The cancellation token fired.
    Cancelled,
}

/// Attempt count and starting delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum calls to the operation.
    pub attempts: u32,
    /// Delay before the second call.
    pub initial: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(attempts: u32, initial: Duration) -> Self {
        Self { attempts, initial }
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.initial)
            .with_factor(2.0)
            .with_max_delay(MAX_DELAY)
            .with_max_times(self.attempts.saturating_sub(1) as usize)
            .build()
            .map(with_jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let max = delay.as_millis() as u64 / 3;
    if max == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Call `op` until it succeeds, stops, runs out of attempts or `cancel` fires.
///
/// `op` runs at most `policy.attempts` times. Cancellation is observed
/// before each call and during each backoff sleep.
///
/// # Errors
/// Returns [`RetryError`] describing why no attempt succeeded.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
    E: std::fmt::Display,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Stop(err)) => return Err(RetryError::Stopped(err)),
            Err(Attempt::Retry(err)) => err,
        };

        let Some(delay) = delays.next().filter(|_| attempt < policy.attempts) else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        };

        warn!(
            attempt,
            of = policy.attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
