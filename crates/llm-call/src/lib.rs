//! Chat-completion calls with retry, per-call cost accounting, and token
//! estimation.
//!
//! `llm-call` wraps a single OpenAI-style (or Azure OpenAI) chat-completion
//! request in three pieces of policy:
//!
//! - a bounded, randomized exponential-backoff retry around the network call
//!   ([`api::retry`]),
//! - a dollar cost for every completed call, computed from the usage the
//!   provider reports and a static [`PriceTable`](api::pricing::PriceTable),
//! - a token estimator for checking prompts against a model's context length
//!   before sending them ([`api::tokens`]).
//!
//! # Getting started
//!
//! ```ignore
//! use llm_call::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LlmError> {
//!     let client = ChatClient::from_env()?;
//!     let caller = LlmCaller::new(client, PriceTable::openai());
//!
//!     let (response, cost) = caller
//!         .call(
//!             "gpt-4-0613",
//!             None,
//!             None,
//!             "You are a terse assistant.",
//!             "Name three prime numbers.",
//!         )
//!         .await?;
//!
//!     println!("{} (${cost:.4})", response.content().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`call`] | [`LlmCaller`]: build `[system, user]` messages, retry, price the result |
//! | [`api`] | Retry policy, price and context-length tables, token estimation |
//! | [`config`] | [`ClientConfig`] for the HTTP client, from code or environment |
//! | [`error`] | [`LlmError`] taxonomy |

pub mod api;
pub mod call;
pub mod config;
pub mod error;
pub mod prelude;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, trace};

pub use call::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT, LlmCaller};
pub use config::{ApiFlavor, ClientConfig};
pub use error::LlmError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Temperature used by [`LlmCaller::call`]: deterministic sampling.
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`, for use as [`FunctionDef::parameters`].
///
/// # Example
///
/// ```
/// use llm_call::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Answer {
///     text: String,
///     #[serde(default)]
///     sources: Vec<String>,
/// }
///
/// let schema = json_schema_for::<Answer>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"text".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body.
///
/// Provider-specific options without a dedicated field go in `extra`; they
/// are flattened into the body unchanged.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDirective>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_functions(mut self, functions: Vec<FunctionDef>) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_function_call(mut self, directive: FunctionCallDirective) -> Self {
        self.function_call = Some(directive);
        self
    }

    /// Pass an arbitrary provider option through (e.g. `max_tokens`, `stop`).
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// How the model may use the supplied functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCallDirective {
    /// The model decides (`"auto"`).
    Auto,
    /// The model must answer in text (`"none"`).
    Off,
    /// The model must call the named function (`{"name": ...}`).
    Function(String),
}

impl FunctionCallDirective {
    /// Parse the CLI spelling: `auto`, `none`, or a function name.
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => FunctionCallDirective::Auto,
            "none" => FunctionCallDirective::Off,
            name => FunctionCallDirective::Function(name.to_string()),
        }
    }
}

impl Serialize for FunctionCallDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunctionCallDirective::Auto => serializer.serialize_str("auto"),
            FunctionCallDirective::Off => serializer.serialize_str("none"),
            FunctionCallDirective::Function(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("name", name)?;
                map.end()
            }
        }
    }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Function,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// The result of running function `name`, fed back to the model.
    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::with_role(MessageRole::Function, content)
        }
    }
}

// ── Function types ─────────────────────────────────────────────────

/// Function definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: serde_json::Value,
}

impl FunctionDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// A function whose parameters are the JSON Schema of `T`.
    pub fn for_type<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, json_schema_for::<T>())
    }
}

/// A function call returned by the model. `arguments` is raw JSON text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// A completed chat-completion call.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The model that actually served the call (may differ in suffix from
    /// the requested one).
    pub model: String,
    pub usage: Usage,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

/// Token usage reported by the provider. This is what gets billed.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl ChatResponse {
    fn first_message(&self) -> Option<&ResponseMessage> {
        self.choices.first().map(|c| &c.message)
    }

    /// Text of the first choice, if the model answered in text.
    pub fn content(&self) -> Option<&str> {
        self.first_message().and_then(|m| m.content.as_deref())
    }

    /// Function call of the first choice, if the model made one.
    pub fn function_call(&self) -> Option<&FunctionCall> {
        self.first_message().and_then(|m| m.function_call.as_ref())
    }

    /// Deserialize the first choice's function-call arguments into `T`.
    pub fn function_arguments<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        let call = self
            .function_call()
            .ok_or_else(|| LlmError::InvalidResponse("response has no function call".into()))?;
        serde_json::from_str(&call.arguments).map_err(|e| {
            LlmError::InvalidResponse(format!("arguments for '{}' do not parse: {e}", call.name))
        })
    }

    /// Check the first choice's function call against the schema of the
    /// function it names in `functions`.
    pub fn validate_function_call(&self, functions: &[FunctionDef]) -> Result<(), LlmError> {
        let call = self
            .function_call()
            .ok_or_else(|| LlmError::InvalidResponse("response has no function call".into()))?;
        let def = functions.iter().find(|f| f.name == call.name).ok_or_else(|| {
            LlmError::InvalidResponse(format!("model called undeclared function '{}'", call.name))
        })?;
        let args: serde_json::Value = serde_json::from_str(&call.arguments).map_err(|e| {
            LlmError::InvalidResponse(format!("arguments for '{}' do not parse: {e}", call.name))
        })?;

        let validator = jsonschema::validator_for(&def.parameters).map_err(|e| {
            LlmError::InvalidResponse(format!("schema for '{}' is invalid: {e}", def.name))
        })?;
        let errors: Vec<String> = validator
            .iter_errors(&args)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::InvalidResponse(format!(
                "arguments for '{}' fail schema validation: {}",
                call.name,
                errors.join("; ")
            )))
        }
    }
}

/// Error envelope returned by OpenAI-compatible APIs.
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ApiErrorDetail {
    message: String,
}

// ── Transport ──────────────────────────────────────────────────────

/// Boxed future returned by [`CompletionTransport::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatResponse, LlmError>> + Send + 'a>>;

/// Anything that can execute one chat-completion request.
///
/// [`ChatClient`] is the HTTP implementation; tests substitute scripted
/// transports. Implementations classify failures into
/// [`LlmError::TransientCall`] / [`LlmError::PermanentCall`] so the retry
/// policy can decide what to do with them.
pub trait CompletionTransport: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a>;
}

impl<T: CompletionTransport + ?Sized> CompletionTransport for Arc<T> {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        (**self).complete(request)
    }
}

impl<T: CompletionTransport + ?Sized> CompletionTransport for &T {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        (**self).complete(request)
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for OpenAI and Azure OpenAI chat completions.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Config("API key is empty".into()));
        }
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Build a client from `OPENAI_*` environment variables.
    pub fn from_env() -> Result<Self, LlmError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL that a request for `model` is posted to.
    ///
    /// For Azure the model is the deployment name and is percent-encoded as
    /// a single path segment.
    pub fn endpoint(&self, model: &str) -> Result<String, LlmError> {
        let base = self.config.base_url.trim_end_matches('/');
        match &self.config.flavor {
            ApiFlavor::OpenAi => Ok(format!("{base}/chat/completions")),
            ApiFlavor::Azure { api_version } => {
                let invalid = |e: String| {
                    LlmError::Config(format!("invalid base URL '{base}': {e}"))
                };
                let mut url = reqwest::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
                url.path_segments_mut()
                    .map_err(|()| invalid("cannot be a base".into()))?
                    .pop_if_empty()
                    .extend(["openai", "deployments", model, "chat", "completions"]);
                url.query_pairs_mut().append_pair("api-version", api_version);
                Ok(url.into())
            }
        }
    }

    /// Send a chat completion request. One attempt; no retries.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatResponse, LlmError> {
        debug!(
            "LLM request: model={}, messages={}, functions={}, temp={}",
            body.model,
            body.messages.len(),
            body.functions.as_ref().map_or(0, |f| f.len()),
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let request = self.client.post(self.endpoint(&body.model)?);
        let request = match &self.config.flavor {
            ApiFlavor::OpenAi => request.bearer_auth(&self.config.api_key),
            ApiFlavor::Azure { .. } => request.header("api-key", &self.config.api_key),
        };

        let resp = request.json(body).send().await.map_err(|e| {
            if e.is_builder() {
                LlmError::permanent(None, format!("request failed: {e}"))
            } else {
                LlmError::transient(None, format!("request failed: {e}"))
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            LlmError::transient(
                Some(status.as_u16()),
                format!("failed to read response: {e}"),
            )
        })?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        parse_response(status.as_u16(), &text)
    }
}

impl CompletionTransport for ChatClient {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(self.chat(request))
    }
}

/// Turn an HTTP status and body into a response or a classified error.
pub(crate) fn parse_response(status: u16, text: &str) -> Result<ChatResponse, LlmError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ApiErrorBody>(text)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| text.to_string());
        return Err(if api::retry::is_transient_status(status) {
            LlmError::transient(Some(status), message)
        } else {
            LlmError::permanent(Some(status), message)
        });
    }

    if let Ok(body) = serde_json::from_str::<ApiErrorBody>(text) {
        let message = body.error.message;
        return Err(if api::retry::is_transient_message(&message) {
            LlmError::transient(Some(status), message)
        } else {
            LlmError::permanent(Some(status), message)
        });
    }

    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;

    debug!(
        "Token usage: model={}, prompt={}, completion={}",
        parsed.model, parsed.usage.prompt_tokens, parsed.usage.completion_tokens,
    );

    Ok(parsed)
}
