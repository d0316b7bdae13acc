//! llmroute CLI
//!
//! Sends one chat through the configured provider instances.

use anyhow::{Context, Result};
use clap::Parser;
use llmroute::api::sse::DEFAULT_HEARTBEAT;
use llmroute::{
    encode_stream, logging, CancelToken, ChatRequest, Message, PromptStore, Provider, Registry,
    StreamAccumulator,
};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "llmroute", version, about = "Route a chat message to the next provider instance")]
struct Cli {
    /// Config file (defaults to the standard search path)
    #[arg(short, long, env = "LLMROUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Pin a model instead of rotating through the instance's list
    #[arg(short, long)]
    model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Override max output tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Override sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Stream the answer as server-sent events
    #[arg(long)]
    stream: bool,

    /// Log filter, e.g. `debug` or `llmroute=trace`
    #[arg(long)]
    log: Option<String>,

    /// Start from a stored prompt template, e.g. `stories/midnight_store`
    #[arg(short, long)]
    prompt: Option<String>,

    /// Template variable as KEY=VALUE (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// The user message, appended after any template messages
    message: Option<String>,
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

impl Cli {
    fn request(&self, prompts: &PromptStore) -> Result<ChatRequest> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }
        if let Some(path) = &self.prompt {
            let vars: serde_json::Map<String, serde_json::Value> = self
                .vars
                .iter()
                .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
                .collect();
            let template = prompts
                .get(path, Some(&serde_json::Value::Object(vars)))
                .with_context(|| format!("rendering prompt '{}'", path))?;
            messages.extend(template.into_messages());
        }
        if let Some(message) = &self.message {
            messages.push(Message::user(message.clone()));
        }
        if messages.is_empty() {
            anyhow::bail!("nothing to send: pass a message or --prompt");
        }

        let mut request = ChatRequest::new(messages);
        request.model = self.model.clone();
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.log.as_deref());

    let registry = match &cli.config {
        Some(path) => Registry::from_config_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Registry::from_default_config().context("loading configuration")?,
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling request");
                cancel.cancel();
            }
        });
    }

    let request = cli.request(&registry.prompts())?;
    if cli.stream {
        stream(&registry, &request, &cancel).await
    } else {
        let response = registry.chat(&request, &cancel).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}

async fn stream(registry: &Registry, request: &ChatRequest, cancel: &CancelToken) -> Result<()> {
    let chunks = registry.chat_stream(request, cancel).await?;

    // Keep a copy of every chunk to print the assembled answer at the end
    let (tap_tx, tap_rx) = tokio::sync::mpsc::channel(llmroute::provider::normalize::STREAM_BUFFER);
    let collector = tokio::spawn(async move {
        let mut chunks = chunks;
        let mut acc = StreamAccumulator::new();
        while let Some(item) = chunks.recv().await {
            if let Ok(chunk) = &item {
                acc.process_chunk(chunk);
            }
            if tap_tx.send(item).await.is_err() {
                break;
            }
        }
        acc
    });

    let mut events = encode_stream(tap_rx, DEFAULT_HEARTBEAT);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        write!(stdout, "{}", event)?;
        stdout.flush()?;
    }

    let acc = collector.await.context("stream collector panicked")?;
    let response = acc.into_response();
    let finish_reason = response
        .choices
        .first()
        .map(|c| c.finish_reason.as_str())
        .unwrap_or_default();
    eprintln!(
        "\n[{} via {}] finish_reason={} tokens={}",
        response.model, response.provider, finish_reason, response.usage.total_tokens
    );
    Ok(())
}
