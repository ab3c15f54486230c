//! Integration tests for the HTTP client.
//!
//! These tests start a real axum server on a random port that replays a
//! script of responses, and point a `ChatClient` at it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use llm_call::api::pricing::PriceTable;
use llm_call::api::retry::{RetryConfig, RetryPolicy};
use llm_call::{
    ChatClient, ClientConfig, FunctionCallDirective, FunctionDef, LlmCaller, LlmError,
};
use serde_json::{Value, json};

/// A request as the fake provider saw it.
#[derive(Debug, Clone)]
struct Seen {
    deployment: Option<String>,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
}

#[derive(Default)]
struct Provider {
    script: Mutex<Vec<(StatusCode, String)>>,
    seen: Mutex<Vec<Seen>>,
}

impl Provider {
    fn respond(&self, seen: Seen) -> (StatusCode, String) {
        self.seen.lock().unwrap().push(seen);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

async fn openai_handler(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    provider.respond(Seen {
        deployment: None,
        query: HashMap::new(),
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    })
}

async fn azure_handler(
    State(provider): State<Arc<Provider>>,
    Path(deployment): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    provider.respond(Seen {
        deployment: Some(deployment),
        query,
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    })
}

/// Helper: spawn a provider on port 0 that replays `script` (the last entry
/// repeats forever). Returns the provider and its base URL.
async fn spawn_provider(script: Vec<(StatusCode, Value)>) -> (Arc<Provider>, String) {
    let provider = Arc::new(Provider {
        script: Mutex::new(
            script
                .into_iter()
                .map(|(status, body)| (status, body.to_string()))
                .collect(),
        ),
        ..Default::default()
    });

    let app = Router::new()
        .route("/v1/chat/completions", post(openai_handler))
        .route(
            "/openai/deployments/{deployment}/chat/completions",
            post(azure_handler),
        )
        .with_state(provider.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (provider, format!("http://{addr}"))
}

fn completion(model: &str, prompt: u64, completion: u64) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Paris"},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        }
    })
}

fn api_error(message: &str) -> Value {
    json!({"error": {"message": message, "type": "error", "code": null}})
}

fn client(base: &str, key: &str) -> ChatClient {
    ChatClient::new(ClientConfig::new(key).with_base_url(format!("{base}/v1"))).unwrap()
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 0.001,
        ..Default::default()
    })
}

// ── OpenAI flavor ────────────────────────────────────────────────────

#[tokio::test]
async fn successful_call_is_parsed_and_priced() {
    let (provider, base) =
        spawn_provider(vec![(StatusCode::OK, completion("gpt-4-0613", 1000, 500))]).await;
    let client = client(&base, "sk-test");
    let caller = LlmCaller::new(client, PriceTable::openai());

    let (response, cost) = caller
        .call("gpt-4-0613", None, None, "Be brief.", "Capital of France?")
        .await
        .unwrap();

    assert_eq!(response.content(), Some("Paris"));
    assert_eq!(response.usage.total_tokens, Some(1500));
    assert!((cost - 0.06).abs() < 1e-12);

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["authorization"], "Bearer sk-test");
    assert_eq!(seen[0].body["model"], "gpt-4-0613");
    assert_eq!(seen[0].body["temperature"], 0.0);
    assert_eq!(seen[0].body["messages"][0]["role"], "system");
    assert_eq!(seen[0].body["messages"][0]["content"], "Be brief.");
    assert_eq!(seen[0].body["messages"][1]["role"], "user");
    assert!(seen[0].body.get("functions").is_none());
}

#[tokio::test]
async fn rate_limits_are_retried() {
    let (provider, base) = spawn_provider(vec![
        (StatusCode::TOO_MANY_REQUESTS, api_error("Rate limit reached")),
        (StatusCode::BAD_GATEWAY, json!("bad gateway")),
        (StatusCode::OK, completion("gpt-35-turbo", 2000, 0)),
    ])
    .await;
    let client = client(&base, "k");
    let caller = LlmCaller::new(client, PriceTable::openai()).with_retry(fast_retries(20));

    let (_, cost) = caller.call_with_defaults("gpt-35-turbo").await.unwrap();

    assert!((cost - 0.003).abs() < 1e-12);
    assert_eq!(provider.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn exhausted_retries_return_last_error() {
    let (provider, base) = spawn_provider(vec![(
        StatusCode::SERVICE_UNAVAILABLE,
        api_error("The server is overloaded"),
    )])
    .await;
    let client = client(&base, "k");
    let caller = LlmCaller::new(client, PriceTable::openai()).with_retry(fast_retries(4));

    let err = caller.call_with_defaults("gpt-35-turbo").await.unwrap_err();

    assert_eq!(
        err,
        LlmError::transient(Some(503), "The server is overloaded")
    );
    assert_eq!(provider.seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let (provider, base) = spawn_provider(vec![(
        StatusCode::UNAUTHORIZED,
        api_error("Incorrect API key provided"),
    )])
    .await;
    let client = client(&base, "bad");
    let caller = LlmCaller::new(client, PriceTable::openai()).with_retry(fast_retries(20));

    let err = caller.call_with_defaults("gpt-4-0613").await.unwrap_err();

    assert_eq!(
        err,
        LlmError::permanent(Some(401), "Incorrect API key provided")
    );
    assert_eq!(provider.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_host_is_transient() {
    // Bind then drop a listener so the port is (almost certainly) closed.
    let port = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let client = ChatClient::new(
        ClientConfig::new("k").with_base_url(format!("http://127.0.0.1:{port}/v1")),
    )
    .unwrap();
    let caller = LlmCaller::new(client, PriceTable::openai()).with_retry(fast_retries(2));

    let err = caller.call_with_defaults("gpt-4-0613").await.unwrap_err();
    assert!(matches!(err, LlmError::TransientCall { status: None, .. }), "{err}");
}

#[tokio::test]
async fn forced_function_call_round_trip() {
    let body = json!({
        "model": "gpt-4-0613",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "function_call": {"name": "answer", "arguments": "{\"city\": \"Paris\"}"}
            },
            "finish_reason": "function_call"
        }],
        "usage": {"prompt_tokens": 80, "completion_tokens": 10, "total_tokens": 90}
    });
    let (provider, base) = spawn_provider(vec![(StatusCode::OK, body)]).await;
    let client = client(&base, "k");
    let caller = LlmCaller::new(client, PriceTable::openai());

    let functions = vec![FunctionDef::new(
        "answer",
        "Report the city",
        json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}),
    )];
    let (response, _) = caller
        .call(
            "gpt-4-0613",
            Some(functions.clone()),
            Some(FunctionCallDirective::Function("answer".into())),
            "sys",
            "Where is the Louvre?",
        )
        .await
        .unwrap();

    response.validate_function_call(&functions).unwrap();
    let args: HashMap<String, String> = response.function_arguments().unwrap();
    assert_eq!(args["city"], "Paris");

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[0].body["function_call"], json!({"name": "answer"}));
    assert_eq!(seen[0].body["functions"][0]["name"], "answer");
}

// ── Azure flavor ─────────────────────────────────────────────────────

#[tokio::test]
async fn azure_uses_deployment_path_and_api_key_header() {
    let (provider, base) =
        spawn_provider(vec![(StatusCode::OK, completion("gpt-35-turbo-16k", 10, 10))]).await;
    let client = ChatClient::new(
        ClientConfig::new("azure-key")
            .with_base_url(base)
            .with_azure("2023-07-01-preview"),
    )
    .unwrap();
    let caller = LlmCaller::new(client, PriceTable::openai());

    caller.call_with_defaults("gpt-35-turbo-16k").await.unwrap();

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[0].deployment.as_deref(), Some("gpt-35-turbo-16k"));
    assert_eq!(seen[0].query["api-version"], "2023-07-01-preview");
    assert_eq!(seen[0].headers["api-key"], "azure-key");
    assert!(seen[0].headers.get("authorization").is_none());
}
