//! HTTP client configuration with sensible defaults.
//!
//! [`ClientConfig`] is built in code with `with_*` methods, or read from the
//! `OPENAI_*` environment variables via [`ClientConfig::from_env`].

use std::time::Duration;

use crate::OPENAI_BASE_URL;
use crate::error::LlmError;

/// API key. Required.
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Base URL. Defaults to [`OPENAI_BASE_URL`]; required for Azure.
pub const ENV_API_BASE: &str = "OPENAI_API_BASE";
/// `openai` (default) or `azure`.
pub const ENV_API_TYPE: &str = "OPENAI_API_TYPE";
/// Azure `api-version` query parameter.
pub const ENV_API_VERSION: &str = "OPENAI_API_VERSION";

/// First Azure API version that accepts `functions` / `function_call`.
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-07-01-preview";

/// Which URL layout and auth header the endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ApiFlavor {
    /// `POST {base}/chat/completions` with a bearer token.
    #[default]
    OpenAi,
    /// `POST {base}/openai/deployments/{model}/chat/completions?api-version=..`
    /// with an `api-key` header. The model identifier is the deployment name.
    Azure { api_version: String },
}

/// Settings for [`ChatClient`](crate::ChatClient).
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Secret sent with every request.
    pub api_key: String,
    /// Endpoint root, without the `/chat/completions` suffix.
    pub base_url: String,
    pub flavor: ApiFlavor,
    /// Per-attempt timeout. Default: 120 s.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            flavor: ApiFlavor::OpenAi,
            timeout: Duration::from_secs(120),
            user_agent: concat!("llm-call/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// Keep the key out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("flavor", &self.flavor)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Use the Azure OpenAI URL layout and auth header.
    pub fn with_azure(mut self, api_version: impl Into<String>) -> Self {
        self.flavor = ApiFlavor::Azure {
            api_version: api_version.into(),
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup` (an environment stand-in).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LlmError> {
        let api_key = lookup(ENV_API_KEY)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Config(format!("{ENV_API_KEY} is not set")))?;
        let base_url = lookup(ENV_API_BASE).filter(|b| !b.is_empty());

        let api_type = lookup(ENV_API_TYPE).unwrap_or_default().to_lowercase();
        let config = match api_type.as_str() {
            "" | "openai" | "open_ai" => {
                let mut config = Self::new(api_key);
                if let Some(base) = base_url {
                    config.base_url = base;
                }
                config
            }
            "azure" => {
                let base = base_url.ok_or_else(|| {
                    LlmError::Config(format!(
                        "{ENV_API_BASE} is required when {ENV_API_TYPE}=azure"
                    ))
                })?;
                let version = lookup(ENV_API_VERSION)
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
                Self::new(api_key).with_base_url(base).with_azure(version)
            }
            other => {
                return Err(LlmError::Config(format!(
                    "unsupported {ENV_API_TYPE} '{other}' (expected 'openai' or 'azure')"
                )));
            }
        };
        Ok(config)
    }
}
