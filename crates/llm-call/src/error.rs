//! Error taxonomy for completion calls, cost lookup, and token estimation.
//!
//! Only [`LlmError::TransientCall`] is recovered from (by the retry policy in
//! [`crate::api::retry`]). Every other variant surfaces to the caller as-is.

use thiserror::Error;

/// Errors produced by the client, the retry wrapper, and the estimators.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// Rate limit, transient 5xx, timeout, or dropped connection.
    #[error("transient completion failure{}: {message}", fmt_status(.status))]
    TransientCall {
        status: Option<u16>,
        message: String,
    },

    /// Bad request, authentication failure, or anything else the provider
    /// will keep rejecting.
    #[error("completion request rejected{}: {message}", fmt_status(.status))]
    PermanentCall {
        status: Option<u16>,
        message: String,
    },

    /// Cost requested for a model that has no row in the price table.
    #[error("no pricing for model '{0}'")]
    UnknownModel(String),

    /// Token estimate requested for a model with no registered tokenizer.
    #[error("no tokenizer registered for model '{0}'")]
    UnsupportedModel(String),

    /// A successful HTTP response whose body could not be interpreted.
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed (missing key, bad base URL, ...).
    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl LlmError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        LlmError::TransientCall {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        LlmError::PermanentCall {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by a call failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::TransientCall { status, .. } | LlmError::PermanentCall { status, .. } => {
                *status
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status() {
        let e = LlmError::transient(Some(429), "rate limited");
        assert_eq!(
            e.to_string(),
            "transient completion failure (HTTP 429): rate limited"
        );

        let e = LlmError::permanent(None, "bad key");
        assert_eq!(e.to_string(), "completion request rejected: bad key");
    }

    #[test]
    fn status_only_for_call_errors() {
        assert_eq!(LlmError::permanent(Some(401), "x").status(), Some(401));
        assert_eq!(LlmError::UnknownModel("m".into()).status(), None);
    }

    #[test]
    fn model_errors_name_the_model() {
        assert!(
            LlmError::UnknownModel("gpt-5".into())
                .to_string()
                .contains("gpt-5")
        );
        assert!(
            LlmError::UnsupportedModel("llama".into())
                .to_string()
                .contains("llama")
        );
    }
}
