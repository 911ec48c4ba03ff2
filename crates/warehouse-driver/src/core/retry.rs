use std::time::Duration;

use rand::Rng;

use super::{classify, warehouse::WarehouseError};
use crate::{
    cli::Args,
    error::{AppError, AppResult},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_args(args: &Args) -> Self {
        Self {
            max_attempts: args.retry_max_attempts.max(1),
            initial_backoff: Duration::from_millis(args.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(args.retry_max_backoff_ms),
            timeout: Duration::from_millis(args.timeout_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt).as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
    }
}

/// Runs a blocking warehouse call, retrying while the classifier allows it.
///
/// Each attempt runs on the blocking pool under `policy.timeout`. When an
/// attempt times out, `interrupt` is called so the abandoned call stops and
/// releases whatever it holds; the attempt is then reported as a 503.
pub async fn run<T, F, I>(policy: &RetryPolicy, op: &'static str, call: F, interrupt: I) -> AppResult<T>
where
    T: Send + 'static,
    F: Fn() -> Result<T, WarehouseError> + Clone + Send + 'static,
    I: Fn(),
{
    let mut attempt = 1;
    loop {
        let f = call.clone();
        let outcome = match tokio::time::timeout(policy.timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                return Err(AppError::internal(format!("{op} worker failed: {join_err}")));
            }
            Err(_) => {
                tracing::warn!(op, attempt, "warehouse call timed out; interrupting");
                interrupt();
                Err(WarehouseError::timeout(policy.timeout))
            }
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !classify::should_retry(err.status_code, &err.message) {
            return Err(AppError::from_warehouse(&err));
        }
        if attempt >= policy.max_attempts {
            tracing::warn!(op, attempt, status_code = err.status_code, "giving up on warehouse call");
            return Err(AppError::from_warehouse(&err));
        }

        let delay = policy.jittered_backoff(attempt);
        tracing::warn!(
            op,
            attempt,
            status_code = err.status_code,
            delay_ms = delay.as_millis() as u64,
            "warehouse call failed; backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
