//! Bounded retry for flaky remote reads.

use std::future::Future;

use clipflow_types::RetryPolicy;
use tracing::warn;

/// The last error seen once every attempt has failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `operation` until it succeeds, the policy's attempts are used up, or
/// `retryable` rejects an error. Non-retryable errors are returned after a
/// single attempt.
pub async fn retry_with_policy<T, E, F, Fut, R>(label: &str, policy: &RetryPolicy, retryable: R, mut operation: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && retryable(&error) => {
                warn!(label, attempt, max_attempts, error = %error, "attempt failed, retrying");
                tokio::time::sleep(policy.delay()).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
        }
    }
}
