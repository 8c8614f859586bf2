// Retry-with-backoff shared by manifest and segment fetches.
//
// The default policy is a fixed delay with a small random jitter; exponential
// growth is available for callers that set `exponential`.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::RelayError;

/// Extra attempts after the first one.
pub const MAX_RETRIES: u32 = 2;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_RETRY_JITTER: Duration = Duration::from_millis(300);

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Delay before each retry.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Upper bound of the random component added to each delay.
    pub jitter: Duration,
    /// Doubles `base_delay` per attempt when set.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_RETRY_DELAY + DEFAULT_RETRY_JITTER,
            jitter: DEFAULT_RETRY_JITTER,
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; handy for tests and one-off fetches.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            exponential: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay and widens `max_delay` so the jitter still fits.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self.max_delay = self.max_delay.max(delay + self.jitter);
        self
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = if self.exponential {
            let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.base_delay
                .checked_mul(multiplier)
                .unwrap_or(self.max_delay)
        } else {
            self.base_delay
        };
        let capped = base.min(self.max_delay);

        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_ms = u64::try_from(self.jitter.as_millis())
            .unwrap_or(u64::MAX)
            .min(remaining_ms);
        if jitter_ms == 0 {
            return capped;
        }

        let extra = rand::rng().random_range(0..=jitter_ms);
        (capped + Duration::from_millis(extra)).min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a retryable error.
    Retry(RelayError),
    /// Operation failed with a non-retryable error.
    Fail(RelayError),
}

impl<T> From<Result<T, RelayError>> for RetryAction<T> {
    fn from(result: Result<T, RelayError>) -> Self {
        match result {
            Ok(value) => RetryAction::Success(value),
            Err(err) if err.is_retryable() => RetryAction::Retry(err),
            Err(err) => RetryAction::Fail(err),
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed) and
/// returns a [`RetryAction`]. The last retryable error is returned once the
/// budget is spent. Cancellation is observed before each attempt and during
/// every sleep.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(RelayError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(RelayError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
