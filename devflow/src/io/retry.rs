//! Retrying wrapper around a model capability.

use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::backoff::BackoffPolicy;
use crate::io::model::{GenerationOptions, Model, ModelError, ModelResponse};

/// Blocking delay between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Retries only [`ModelError::RateLimited`] with bounded exponential backoff.
/// When attempts run out, the last rate-limit error becomes
/// [`ModelError::QuotaExhausted`]. Every other error propagates at once.
pub struct RetryingModel<M> {
    inner: M,
    policy: BackoffPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl<M: Model> RetryingModel<M> {
    pub fn new(inner: M, policy: BackoffPolicy) -> Self {
        Self::with_sleeper(inner, policy, Box::new(ThreadSleeper))
    }

    pub fn with_sleeper(inner: M, policy: BackoffPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            inner,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

impl<M: Model> Model for RetryingModel<M> {
    #[instrument(skip_all, fields(max_attempts = self.policy.max_attempts))]
    fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ModelError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.generate(prompt, options) {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_rate_limited() => {
                    if !self.policy.allows_retry_after(attempt) {
                        warn!(attempt, "rate limited; retries exhausted");
                        return Err(ModelError::QuotaExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let delay = self.policy.delay_after(attempt);
                    warn!(attempt, delay_secs = delay.as_secs(), "rate limited; backing off");
                    self.sleeper.sleep(delay);
                }
                Err(err) => {
                    debug!(attempt, err = %err, "model call failed without retry");
                    return Err(err);
                }
            }
        }
    }
}
