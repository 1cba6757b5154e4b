//! Retry logic with exponential backoff.
//!
//! Every network call in the pipeline (session setup, listing pages,
//! document fetches, asset downloads) goes through [`with_retry`]. Errors
//! decide for themselves whether another attempt can help via
//! [`IsRetryable`]; the wrapper only owns the timing.
//!
//! With the default [`RetryPolicy`] (500 ms base, ×2, 3 retries) the wait
//! sequence is 500 ms → 1 s → 2 s, each stretched by up to 100 % jitter so
//! concurrent fetch workers do not retry in lock step. A server-supplied
//! `Retry-After` replaces the computed delay for that attempt.

use crate::config::RetryPolicy;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient or permanent.
///
/// Transient failures (timeouts, resets, 429, 5xx) return `true`.
/// Permanent failures (401, 404, malformed request) return `false`.
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again.
    fn is_retryable(&self) -> bool;

    /// Server-requested delay before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// retry budget is spent.
///
/// `what` names the operation in log lines (a URL or an item id).
///
/// Returns the last error unchanged. A retryable error coming out of this
/// function therefore always means `policy.max_retries + 1` attempts were
/// made.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = policy.initial_backoff;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(target_name = what, attempts = attempt + 1, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;

                let wait = match e.retry_after() {
                    Some(hint) => hint.min(policy.max_backoff),
                    None if policy.jitter => add_jitter(delay),
                    None => delay,
                };

                tracing::warn!(
                    target_name = what,
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = wait.as_millis() as u64,
                    "Transient failure, retrying"
                );

                tokio::time::sleep(wait).await;

                let next = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier);
                delay = next.min(policy.max_backoff);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        target_name = what,
                        error = %e,
                        attempts = attempt + 1,
                        "Giving up after all retries"
                    );
                } else {
                    tracing::debug!(target_name = what, error = %e, "Permanent failure, not retrying");
                }
                return Err(e);
            }
        }
    }
}

/// Stretch `delay` by a uniform 0–100 % so the result lies in `[delay, 2 * delay]`.
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
