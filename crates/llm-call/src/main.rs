//! Send priced chat completions, estimate tokens, and look up prices.
//!
//! Reads credentials from the `OPENAI_API_KEY` environment variable, plus
//! `OPENAI_API_BASE`, `OPENAI_API_TYPE=azure` and `OPENAI_API_VERSION` for
//! Azure OpenAI deployments.
//!
//! # Examples
//!
//! ```sh
//! # Basic request (cost is logged to stderr)
//! llm-call call --model gpt-4-0613 --user "Summarize RFC 9110 in one line"
//!
//! # Pipe content from stdin with a custom system prompt
//! cat notes.md | llm-call call --model gpt-35-turbo-16k \
//!   --system "Extract the action items." --stdin
//!
//! # Structured output via a forced function call
//! llm-call call --model gpt-4-0613 --user "Who wrote Dune?" \
//!   --functions answer.json --function-call answer --validate
//!
//! # Will this prompt fit?
//! llm-call tokens --model gpt-4-0613 --stdin < prompt.txt
//!
//! # Price a call after the fact
//! llm-call cost --model gpt-4-0613 --prompt-tokens 1000 --completion-tokens 500
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use llm_call::api::retry::DEFAULT_MAX_ATTEMPTS;
use llm_call::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llm-call", version)]
struct Cli {
    /// Log request details and token usage (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a system + user prompt, print the reply, log its cost
    Call(CallArgs),
    /// Estimate how many tokens some text occupies for a model
    Tokens(TokensArgs),
    /// Price a call from its token counts
    Cost(CostArgs),
    /// List priced models with their context lengths
    Models,
}

#[derive(Args)]
struct CallArgs {
    // ── Message content ────────────────────────────────────────
    /// Model (or Azure deployment) identifier
    #[arg(long)]
    model: String,

    /// System prompt to set the assistant's behavior
    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    system: String,

    /// User message to send
    #[arg(long)]
    user: Option<String>,

    /// Read user content from stdin
    #[arg(long)]
    stdin: bool,

    // ── Function calling ───────────────────────────────────────
    /// Path to a JSON file with an array of function definitions
    #[arg(long)]
    functions: Option<PathBuf>,

    /// Force a function call: a function name, `auto`, or `none`
    #[arg(long)]
    function_call: Option<String>,

    /// Check returned function-call arguments against the declared schema
    #[arg(long)]
    validate: bool,

    // ── Retry / transport ──────────────────────────────────────
    /// Total attempts before giving up on transient failures
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Per-attempt HTTP timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Stop retrying once this many seconds have passed in total
    #[arg(long)]
    deadline_secs: Option<u64>,

    // ── Output mode ────────────────────────────────────────────
    /// Print the full response as JSON
    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct TokensArgs {
    /// Model whose tokenizer to use
    #[arg(long)]
    model: String,

    /// Text to count
    #[arg(long)]
    text: Option<String>,

    /// Read the text from stdin
    #[arg(long)]
    stdin: bool,
}

#[derive(Args)]
struct CostArgs {
    #[arg(long)]
    model: String,

    #[arg(long, default_value_t = 0)]
    prompt_tokens: u64,

    #[arg(long, default_value_t = 0)]
    completion_tokens: u64,
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "llm_call=debug"
    } else {
        "llm_call=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

/// Combine `--user`/`--text` and piped stdin into one string.
fn combine_input(flag: Option<&str>, piped: Option<String>) -> Result<String, String> {
    match (flag, piped) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.to_string()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err("provide the text as a flag, --stdin, or both".to_string()),
    }
}

fn read_input(flag: Option<&str>, stdin: bool) -> Result<String, String> {
    let piped = if stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };
    combine_input(flag, piped)
}

/// Load function definitions from a JSON array file.
fn load_functions(path: &Path) -> Result<Vec<FunctionDef>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read functions file '{}': {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse functions file '{}': {e}", path.display()))
}

/// Text to print for a completed call: the reply, or the function call.
fn render_response(response: &ChatResponse, raw: bool) -> Result<String, String> {
    if raw {
        return serde_json::to_string_pretty(response)
            .map_err(|e| format!("failed to format response: {e}"));
    }
    if let Some(call) = response.function_call() {
        // Show malformed arguments verbatim rather than failing the command.
        let args: serde_json::Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "name": call.name,
            "arguments": args,
        }))
        .map_err(|e| format!("failed to serialize function call: {e}"))?;
        return Ok(format!("[function_call]\n{json}\n"));
    }
    Ok(format!("{}\n", response.content().unwrap_or_default()))
}

// ── Commands ───────────────────────────────────────────────────────

async fn run_call(args: &CallArgs) -> Result<String, String> {
    let user_content = read_input(args.user.as_deref(), args.stdin)?;
    let functions = args.functions.as_deref().map(load_functions).transpose()?;
    let directive = args.function_call.as_deref().map(FunctionCallDirective::parse);

    let config = ClientConfig::from_env()
        .map_err(|e| e.to_string())?
        .with_timeout(Duration::from_secs(args.timeout_secs));
    let client = ChatClient::new(config).map_err(|e| e.to_string())?;

    let mut retry = RetryConfig::with_attempts(args.max_attempts);
    if let Some(secs) = args.deadline_secs {
        retry = retry.with_deadline(Duration::from_secs(secs));
    }
    let caller =
        LlmCaller::new(client, PriceTable::openai()).with_retry(RetryPolicy::new(retry));

    let (response, _cost) = caller
        .call(
            &args.model,
            functions.clone(),
            directive,
            &args.system,
            &user_content,
        )
        .await
        .map_err(|e| e.to_string())?;

    if args.validate {
        let functions = functions.unwrap_or_default();
        response
            .validate_function_call(&functions)
            .map_err(|e| e.to_string())?;
    }

    render_response(&response, args.raw)
}

fn run_tokens(args: &TokensArgs) -> Result<String, String> {
    let text = read_input(args.text.as_deref(), args.stdin)?;
    let count = TokenEstimator::openai()
        .count(&args.model, &text)
        .map_err(|e| e.to_string())?;
    let limits = ContextLengthTable::openai();
    Ok(match limits.get(&args.model) {
        Some(max) => format!(
            "{count} tokens ({} of {max} left for the completion)\n",
            max.saturating_sub(count)
        ),
        None => format!("{count} tokens\n"),
    })
}

fn run_cost(args: &CostArgs) -> Result<String, String> {
    let cost = PriceTable::openai()
        .cost(&args.model, args.prompt_tokens, args.completion_tokens)
        .map_err(|e| e.to_string())?;
    Ok(format!("${cost:.4}\n"))
}

fn run_models() -> String {
    let limits = ContextLengthTable::openai();
    PriceTable::openai()
        .models()
        .map(|(model, p)| {
            let context = limits
                .get(model)
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            format!(
                "{model:<18} prompt ${:.4}/1K  completion ${:.4}/1K  context {context}\n",
                p.prompt_per_1k, p.completion_per_1k
            )
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Call(args) => run_call(args).await,
        Command::Tokens(args) => run_tokens(args),
        Command::Cost(args) => run_cost(args),
        Command::Models => Ok(run_models()),
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
