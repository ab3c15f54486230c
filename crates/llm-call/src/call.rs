//! One priced, retried chat completion.
//!
//! [`LlmCaller`] builds the `[system, user]` conversation, runs it through a
//! [`RetryPolicy`], prices the response with the injected [`PriceTable`], and
//! hands both back. It adds no error classes of its own: transport, retry and
//! pricing errors reach the caller unchanged.

use tracing::info;

use crate::api::pricing::PriceTable;
use crate::api::retry::RetryPolicy;
use crate::error::LlmError;
use crate::{
    ChatRequest, ChatResponse, CompletionTransport, FunctionCallDirective, FunctionDef, Message,
};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI assistant that answers user questions using the context provided.";

pub const DEFAULT_USER_PROMPT: &str = "Please help me answer the following question:";

/// Runs completions through a transport with retry and cost accounting.
///
/// Holds no mutable state, so one caller can serve many concurrent tasks.
///
/// # Example
///
/// ```ignore
/// let caller = LlmCaller::new(ChatClient::from_env()?, PriceTable::openai())
///     .with_retry(RetryPolicy::new(RetryConfig::with_attempts(5)));
///
/// let (response, cost) = caller
///     .call("gpt-35-turbo", None, None, DEFAULT_SYSTEM_PROMPT, "What is 2 + 2?")
///     .await?;
/// ```
#[derive(Debug)]
pub struct LlmCaller<T> {
    transport: T,
    prices: PriceTable,
    retry: RetryPolicy,
}

impl<T: CompletionTransport> LlmCaller<T> {
    /// A caller with the default policy: 20 attempts, 1–60 s randomized
    /// exponential backoff, only transient failures retried.
    pub fn new(transport: T, prices: PriceTable) -> Self {
        Self {
            transport,
            prices,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The request [`call`](Self::call) sends: system then user message,
    /// temperature 0, function fields only when given.
    pub fn build_request(
        model: &str,
        functions: Option<Vec<FunctionDef>>,
        function_call: Option<FunctionCallDirective>,
        system_prompt: &str,
        user_prompt: &str,
    ) -> ChatRequest {
        let mut request = ChatRequest::new(
            model,
            vec![Message::system(system_prompt), Message::user(user_prompt)],
        );
        request.functions = functions;
        request.function_call = function_call;
        request
    }

    /// Send one system + user prompt pair and price the result.
    ///
    /// `functions` declares callable functions; `function_call` forces (or
    /// forbids) a call, e.g. to get structured output matching a schema.
    pub async fn call(
        &self,
        model: &str,
        functions: Option<Vec<FunctionDef>>,
        function_call: Option<FunctionCallDirective>,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(ChatResponse, f64), LlmError> {
        let request =
            Self::build_request(model, functions, function_call, system_prompt, user_prompt);
        self.complete(&request).await
    }

    /// [`call`](Self::call) with [`DEFAULT_SYSTEM_PROMPT`] and
    /// [`DEFAULT_USER_PROMPT`] and no functions.
    pub async fn call_with_defaults(&self, model: &str) -> Result<(ChatResponse, f64), LlmError> {
        self.call(model, None, None, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT)
            .await
    }

    /// Run an arbitrary request through the retry policy and price it.
    pub async fn complete(&self, request: &ChatRequest) -> Result<(ChatResponse, f64), LlmError> {
        let response = self
            .retry
            .run(|| self.transport.complete(request))
            .await?;
        let cost = self.prices.call_cost(&response)?;
        info!(
            "LLM call cost: ${cost:.4} (model={}, prompt={}, completion={})",
            response.model, response.usage.prompt_tokens, response.usage.completion_tokens,
        );
        Ok((response, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::retry::RetryConfig;
    use crate::{CompletionFuture, MessageRole, Usage};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned results and records every request it sees.
    struct Scripted {
        results: Mutex<Vec<Result<ChatResponse, LlmError>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<ChatResponse, LlmError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl CompletionTransport for Scripted {
        fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
            self.seen.lock().unwrap().push(request.clone());
            let next = self
                .results
                .lock()
                .unwrap()
                .pop()
                .expect("transport called more often than scripted");
            Box::pin(async move { next })
        }
    }

    fn ok(model: &str, prompt: u64, completion: u64) -> Result<ChatResponse, LlmError> {
        Ok(ChatResponse {
            model: model.into(),
            usage: Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: None,
            },
            ..Default::default()
        })
    }

    fn instant_retries(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn sends_system_then_user_at_zero_temperature() {
        let transport = Scripted::new(vec![ok("gpt-4-0613", 1000, 500)]);
        let caller = LlmCaller::new(transport, PriceTable::openai());
        let (resp, cost) = caller
            .call("gpt-4-0613", None, None, "sys", "usr")
            .await
            .unwrap();
        assert_eq!(resp.model, "gpt-4-0613");
        assert!((cost - 0.06).abs() < 1e-12);

        let seen = caller.transport().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, MessageRole::System);
        assert_eq!(req.messages[0].content.as_deref(), Some("sys"));
        assert_eq!(req.messages[1].role, MessageRole::User);
        assert_eq!(req.messages[1].content.as_deref(), Some("usr"));
        assert!(req.functions.is_none());
        assert!(req.function_call.is_none());
    }

    #[tokio::test]
    async fn function_fields_forwarded() {
        let transport = Scripted::new(vec![ok("gpt-35-turbo", 1, 1)]);
        let caller = LlmCaller::new(transport, PriceTable::openai());
        let defs = vec![FunctionDef::new("answer", "", serde_json::json!({"type": "object"}))];
        caller
            .call(
                "gpt-35-turbo",
                Some(defs.clone()),
                Some(FunctionCallDirective::Function("answer".into())),
                DEFAULT_SYSTEM_PROMPT,
                DEFAULT_USER_PROMPT,
            )
            .await
            .unwrap();

        let seen = caller.transport().seen.lock().unwrap();
        assert_eq!(seen[0].functions.as_deref(), Some(defs.as_slice()));
        assert_eq!(
            seen[0].function_call,
            Some(FunctionCallDirective::Function("answer".into()))
        );
    }

    #[tokio::test]
    async fn retries_transient_then_prices_success() {
        let transport = Scripted::new(vec![
            Err(LlmError::transient(Some(429), "slow down")),
            Err(LlmError::transient(Some(503), "busy")),
            ok("gpt-35-turbo", 2000, 0),
        ]);
        let caller =
            LlmCaller::new(transport, PriceTable::openai()).with_retry(instant_retries(20));
        let (_, cost) = caller.call_with_defaults("gpt-35-turbo").await.unwrap();
        assert!((cost - 0.003).abs() < 1e-12);
        assert_eq!(caller.transport().seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn permanent_error_surfaces_after_one_attempt() {
        let transport = Scripted::new(vec![Err(LlmError::permanent(Some(401), "bad key"))]);
        let caller =
            LlmCaller::new(transport, PriceTable::openai()).with_retry(instant_retries(20));
        let err = caller.call_with_defaults("gpt-4-0613").await.unwrap_err();
        assert_eq!(err, LlmError::permanent(Some(401), "bad key"));
        assert_eq!(caller.transport().seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unpriced_response_model_is_an_error() {
        // Priced by the model the provider reports, not the one requested.
        let transport = Scripted::new(vec![ok("gpt-4-1106-preview", 10, 10)]);
        let caller = LlmCaller::new(transport, PriceTable::openai());
        let err = caller.call_with_defaults("gpt-4-0613").await.unwrap_err();
        assert_eq!(err, LlmError::UnknownModel("gpt-4-1106-preview".into()));
    }

    #[tokio::test]
    async fn complete_passes_request_through() {
        let transport = Scripted::new(vec![ok("gpt-4-32k", 0, 0)]);
        let caller = LlmCaller::new(transport, PriceTable::openai());
        let request = ChatRequest::new("gpt-4-32k", vec![Message::user("hi")])
            .with_temperature(0.7)
            .with_option("max_tokens", serde_json::json!(10));
        let (_, cost) = caller.complete(&request).await.unwrap();
        assert_eq!(cost, 0.0);
        assert_eq!(caller.transport().seen.lock().unwrap()[0], request);
    }
}
