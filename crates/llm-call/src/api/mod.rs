//! Call policy: retry, pricing, and token estimation.
//!
//! - [`retry`]: bounded retry with randomized exponential backoff and an
//!   overridable retryable-error classifier. Only transient failures (429,
//!   5xx, timeouts, dropped connections) are retried by default.
//! - [`pricing`]: [`PriceTable`] (USD per 1K prompt / completion tokens) and
//!   [`ContextLengthTable`]. Unknown models are errors, never free.
//! - [`tokens`]: [`TokenEstimator`], a model → tokenizer registry for
//!   pre-call token counts.

pub mod pricing;
pub mod retry;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use pricing::{ContextLengthTable, ModelPricing, PriceTable};
pub use retry::{RetryConfig, RetryPolicy, Retryable, retry, retry_with};
pub use tokens::TokenEstimator;
