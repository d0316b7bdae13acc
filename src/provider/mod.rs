//! Provider Module
//!
//! Vendor clients behind a common chat interface.

pub mod gemini;
pub mod instance;
pub mod normalize;
pub mod openai;

use crate::api::{ChatRequest, ChatResponse, ChatStream};
use crate::client::CancelToken;
use crate::config::ProviderKind;
use crate::error::Result;
use async_trait::async_trait;

pub use gemini::GeminiProvider;
pub use instance::InstanceContext;
pub use openai::OpenAiProvider;

/// A chat backend: a single vendor instance, or the registry routing between them
#[async_trait]
pub trait Provider: Send + Sync {
    /// One-shot chat completion
    async fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatResponse>;

    /// Streaming chat completion; chunks arrive on the returned channel
    async fn chat_stream(&self, request: &ChatRequest, cancel: &CancelToken)
        -> Result<ChatStream>;
}

/// Build the vendor client matching the instance's protocol
pub fn for_instance(ctx: InstanceContext) -> Box<dyn Provider> {
    match ctx.kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(ctx)),
        ProviderKind::Gemini => Box::new(GeminiProvider::new(ctx)),
    }
}
