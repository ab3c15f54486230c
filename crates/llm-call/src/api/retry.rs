//! Automatic retry with randomized exponential backoff.
//!
//! Retries transient completion failures (429, 5xx, network timeouts) up to a
//! bounded number of total attempts. Which errors count as transient is up to
//! a classifier: [`Retryable`] supplies the default for [`LlmError`], and
//! [`retry_with`] / [`RetryPolicy::with_classifier`] accept any predicate.
//!
//! The wait after failed attempt `n` is drawn uniformly from
//! `[min_delay, clamp(multiplier * exp_base^(n-1), min_delay, max_delay)]`,
//! so concurrent callers that fail together do not retry in lockstep.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::LlmError;

/// Total attempts (first call included) before the last error is returned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (1 = never retry).
    pub max_attempts: u32,
    /// Lower bound of every wait.
    pub min_delay: Duration,
    /// Upper bound of every wait.
    pub max_delay: Duration,
    /// Scale applied to the exponential term, in seconds.
    pub multiplier: f64,
    /// Base of the exponential term (2.0 doubles the ceiling per attempt).
    pub exp_base: f64,
    /// Draw the wait uniformly below the ceiling instead of using it as-is.
    pub jitter: bool,
    /// Stop retrying once the next wait would end past this much total time.
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            exp_base: 2.0,
            jitter: true,
            deadline: None,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt budget. Uses default backoff.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retries() -> Self {
        Self::with_attempts(1)
    }

    /// Abort remaining retries once `deadline` of total time would be exceeded.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-based).
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.multiplier * self.exp_base.powi(exponent);
        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        // f64::min ignores NaN, so a degenerate multiplier lands on `max`.
        Duration::from_secs_f64(raw.min(max).max(min))
    }

    /// The wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        if !self.jitter || ceiling <= self.min_delay {
            return ceiling;
        }
        let secs = rand::thread_rng()
            .gen_range(self.min_delay.as_secs_f64()..=ceiling.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        matches!(self, LlmError::TransientCall { .. })
    }
}

/// HTTP statuses worth another attempt: timeouts, conflicts, rate limits,
/// and the transient 5xx family.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429 | 500 | 502 | 503 | 504)
}

/// Whether transport error text describes a transient network failure.
pub fn is_transient_message(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "connection reset",
        "connection refused",
        "connection closed",
        "timed out",
        "timeout",
        "broken pipe",
        "network",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

/// Retry `call` using the error type's own [`Retryable`] classification.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, call: F) -> Result<T, E>
where
    E: Retryable + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with(config, E::is_retryable, call).await
}

/// Retry an async call with randomized exponential backoff.
///
/// Returns the first success. A failure rejected by `is_retryable` is
/// returned immediately; a retryable failure is retried until
/// `config.max_attempts` attempts have been made (or the deadline would be
/// crossed), and then the final error is returned unchanged.
pub async fn retry_with<T, E, F, Fut, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut call: F,
) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let start = Instant::now();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let e = match call().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(e);
        }
        if attempt >= max_attempts {
            warn!("Giving up after {attempt} attempt(s): {e}");
            return Err(e);
        }

        let delay = config.delay_for_attempt(attempt);
        if let Some(deadline) = config.deadline
            && start.elapsed() + delay > deadline
        {
            warn!(
                "Retry deadline of {deadline:?} reached after {attempt} attempt(s): {e}"
            );
            return Err(e);
        }

        info!(
            "Call failed (attempt {attempt}/{max_attempts}, {:.3}s elapsed): {e}. Retrying in {delay:?}",
            start.elapsed().as_secs_f64(),
        );
        tokio::time::sleep(delay).await;
    }
}

/// Predicate deciding which [`LlmError`]s are retried.
pub type Classifier = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;

/// A [`RetryConfig`] paired with an overridable retryable-error classifier.
///
/// The default classifier retries only [`LlmError::TransientCall`].
#[derive(Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    classifier: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(|e: &LlmError| e.is_retryable()),
        }
    }

    /// Replace the retryable-error classifier.
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&LlmError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, error: &LlmError) -> bool {
        (self.classifier)(error)
    }

    /// Run `call` under this policy.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        retry_with(&self.config, |e| self.is_retryable(e), call).await
    }
}
