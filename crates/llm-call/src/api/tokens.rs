//! Pre-call token estimation.
//!
//! Counts are for planning (checking a prompt against a
//! [`ContextLengthTable`](super::pricing::ContextLengthTable) before sending
//! it). Billing always uses the usage the provider reports after the call.
//!
//! Each model must be mapped to a tokenizer explicitly; there is no fallback
//! encoding, since a near-miss count would skew every budget built on it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};
use tracing::{debug, warn};

use crate::Message;
use crate::error::LlmError;

/// Maps model identifiers to tokenizers and counts tokens with them.
///
/// Encoders are loaded on first use and shared between models that use the
/// same tokenizer. Safe to share across tasks.
pub struct TokenEstimator {
    registry: BTreeMap<String, Tokenizer>,
    tiktoken_lookup: bool,
    encoders: Mutex<Vec<(Tokenizer, Arc<CoreBPE>)>>,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::openai()
    }
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("registry", &self.registry)
            .field("tiktoken_lookup", &self.tiktoken_lookup)
            .finish_non_exhaustive()
    }
}

impl TokenEstimator {
    /// An estimator with no registered models.
    pub fn new() -> Self {
        Self {
            registry: BTreeMap::new(),
            tiktoken_lookup: false,
            encoders: Mutex::new(Vec::new()),
        }
    }

    /// Tokenizers for the deployment's chat and embedding models.
    pub fn openai() -> Self {
        Self::new()
            .with_model("gpt-35-turbo", Tokenizer::Cl100kBase)
            .with_model("gpt-35-turbo-16k", Tokenizer::Cl100kBase)
            .with_model("gpt-4-0613", Tokenizer::Cl100kBase)
            .with_model("gpt-4-32k", Tokenizer::Cl100kBase)
            .with_model("text-embedding-ada-002", Tokenizer::Cl100kBase)
    }

    /// Register (or replace) the tokenizer for `model`.
    pub fn with_model(mut self, model: impl Into<String>, tokenizer: Tokenizer) -> Self {
        self.registry.insert(model.into(), tokenizer);
        self
    }

    /// Also accept any model name tiktoken itself knows about.
    pub fn with_tiktoken_lookup(mut self) -> Self {
        self.tiktoken_lookup = true;
        self
    }

    /// The tokenizer used for `model`.
    pub fn tokenizer_for(&self, model: &str) -> Result<Tokenizer, LlmError> {
        if let Some(t) = self.registry.get(model) {
            return Ok(*t);
        }
        if self.tiktoken_lookup
            && let Some(t) = get_tokenizer(model)
        {
            return Ok(t);
        }
        Err(LlmError::UnsupportedModel(model.to_string()))
    }

    /// Number of tokens `text` occupies for `model`.
    ///
    /// Special-token markup such as `<|endoftext|>` is counted as the plain
    /// text it is, never as the single special token.
    pub fn count(&self, model: &str, text: &str) -> Result<usize, LlmError> {
        let tokenizer = self.tokenizer_for(model)?;
        if text.is_empty() {
            return Ok(0);
        }
        let bpe = self.encoder(model, tokenizer)?;
        Ok(bpe.encode_ordinary(text).len())
    }

    /// Sum of content tokens across `messages`. Role and framing overhead
    /// are not included.
    pub fn count_messages(&self, model: &str, messages: &[Message]) -> Result<usize, LlmError> {
        self.tokenizer_for(model)?;
        let mut total = 0;
        for msg in messages {
            if let Some(ref content) = msg.content {
                total += self.count(model, content)?;
            }
        }
        Ok(total)
    }

    fn encoder(&self, model: &str, tokenizer: Tokenizer) -> Result<Arc<CoreBPE>, LlmError> {
        let mut encoders = self.encoders.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, bpe)) = encoders.iter().find(|(t, _)| *t == tokenizer) {
            return Ok(Arc::clone(bpe));
        }

        debug!("Loading {tokenizer:?} encoder for model {model}");
        let bpe = tiktoken_rs::get_bpe_from_tokenizer(tokenizer).map_err(|e| {
            warn!("Failed to load {tokenizer:?} encoder for model {model}: {e}");
            LlmError::UnsupportedModel(model.to_string())
        })?;
        let bpe = Arc::new(bpe);
        encoders.push((tokenizer, Arc::clone(&bpe)));
        Ok(bpe)
    }
}
