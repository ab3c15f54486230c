//! Per-model price and context-length tables.
//!
//! Both tables are plain values built once at startup and handed to whoever
//! needs them; nothing here reads global state. An unknown model is an error,
//! never a zero-cost default, so unpriced traffic cannot hide in the totals.

use std::collections::BTreeMap;

use crate::ChatResponse;
use crate::error::LlmError;

/// Per-model pricing for cost estimation (USD per 1K tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Price per 1K prompt tokens.
    pub prompt_per_1k: f64,
    /// Price per 1K completion tokens.
    pub completion_per_1k: f64,
}

impl ModelPricing {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Estimate cost for given token counts. Not rounded.
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_1k) / 1000.0
            + (completion_tokens as f64 * self.completion_per_1k) / 1000.0
    }
}

/// Chat-completion prices, plus per-1K prices for embedding models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    chat: BTreeMap<String, ModelPricing>,
    embeddings: BTreeMap<String, f64>,
}

impl PriceTable {
    /// An empty table. Every lookup fails until rows are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// The deployment's price list.
    pub fn openai() -> Self {
        Self::new()
            .with_model("gpt-35-turbo", ModelPricing::new(0.0015, 0.002))
            .with_model("gpt-35-turbo-16k", ModelPricing::new(0.003, 0.004))
            .with_model("gpt-4-0613", ModelPricing::new(0.03, 0.06))
            .with_model("gpt-4-32k", ModelPricing::new(0.06, 0.12))
            .with_embedding("hugging_face", 0.0)
            .with_embedding("text-embedding-ada-002", 0.0001)
    }

    /// Add or replace the chat pricing for `model`.
    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.chat.insert(model.into(), pricing);
        self
    }

    /// Add or replace the per-1K embedding price for `model`.
    pub fn with_embedding(mut self, model: impl Into<String>, per_1k: f64) -> Self {
        self.embeddings.insert(model.into(), per_1k);
        self
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.chat.get(model)
    }

    /// Chat models with a price row, in sorted order.
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPricing)> {
        self.chat.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Dollar cost of a call to `model` with the given token counts.
    pub fn cost(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Result<f64, LlmError> {
        self.get(model)
            .map(|p| p.estimate_cost(prompt_tokens, completion_tokens))
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))
    }

    /// Dollar cost of a completed call, priced by the model the provider
    /// reports in the response and the usage it billed.
    pub fn call_cost(&self, response: &ChatResponse) -> Result<f64, LlmError> {
        self.cost(
            &response.model,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        )
    }

    /// Dollar cost of embedding `tokens` tokens with `model`.
    pub fn embedding_cost(&self, model: &str, tokens: u64) -> Result<f64, LlmError> {
        self.embeddings
            .get(model)
            .map(|per_1k| (tokens as f64 * per_1k) / 1000.0)
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))
    }
}

/// Maximum context length (prompt + completion tokens) per model.
///
/// Advisory only: the client never enforces it. Callers check a
/// [`TokenEstimator`](super::tokens::TokenEstimator) count against it before
/// spending quota on a request that cannot fit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextLengthTable {
    limits: BTreeMap<String, usize>,
}

impl ContextLengthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context lengths for the models in [`PriceTable::openai`].
    pub fn openai() -> Self {
        Self::new()
            .with_model("gpt-35-turbo", 4097)
            .with_model("gpt-35-turbo-16k", 16385)
            .with_model("gpt-4-0613", 8192)
            .with_model("gpt-4-32k", 32768)
    }

    pub fn with_model(mut self, model: impl Into<String>, max_tokens: usize) -> Self {
        self.limits.insert(model.into(), max_tokens);
        self
    }

    pub fn get(&self, model: &str) -> Option<usize> {
        self.limits.get(model).copied()
    }

    /// Tokens left for the completion after a prompt of `prompt_tokens`.
    pub fn remaining(&self, model: &str, prompt_tokens: usize) -> Option<usize> {
        self.get(model).map(|max| max.saturating_sub(prompt_tokens))
    }

    /// Whether a prompt of `prompt_tokens` fits in `model`'s window.
    /// Unknown models never fit.
    pub fn fits(&self, model: &str, prompt_tokens: usize) -> bool {
        self.get(model).is_some_and(|max| prompt_tokens <= max)
    }
}
