//! llmroute - multi-provider LLM chat routing
//!
//! Spreads chat traffic across configured provider instances with round-robin
//! key and model rotation, per-instance rate limiting, linear-backoff retries
//! and a single normalized response and stream shape for OpenAI-compatible and
//! Gemini upstreams. Reusable prompts are stored as JSON templates and
//! rendered into chat messages.
//!
//! ```no_run
//! use llmroute::{CancelToken, ChatRequest, Message, Provider, Registry};
//!
//! # async fn run() -> llmroute::Result<()> {
//! let registry = Registry::from_default_config()?;
//! let request = ChatRequest::new(vec![Message::user("Hello!")]);
//! let response = registry.chat(&request, &CancelToken::new()).await?;
//! println!("{}", response.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod provider;
pub mod router;

pub use api::{
    encode_stream, ChatRequest, ChatResponse, ChatStream, ChatStreamResponse, Choice, Event,
    Message, MessageDelta, StreamAccumulator, StreamChoice, Usage,
};
pub use client::CancelToken;
pub use config::{AiConfig, ConfigLoader, ProviderConfig, ProviderInstanceConfig, ProviderKind};
pub use error::{Result, RouterError};
pub use prompt::{PromptStore, PromptTemplate};
pub use provider::Provider;
pub use router::Registry;
