//! Convenience re-exports for common `llm-call` types.
//!
//! ```ignore
//! use llm_call::prelude::*;
//! ```

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ChatClient, ChatRequest, ChatResponse, ClientConfig, CompletionTransport,
    FunctionCallDirective, FunctionDef, LlmCaller, LlmError, Message, Usage, json_schema_for,
};

// ── Call policy ─────────────────────────────────────────────────────
pub use crate::api::{
    ContextLengthTable, ModelPricing, PriceTable, RetryConfig, RetryPolicy, TokenEstimator,
};
pub use crate::call::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
