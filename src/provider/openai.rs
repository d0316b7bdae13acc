//! OpenAI-compatible chat completions client.

use crate::api::completion::{ChatRequest, ChatResponse, Choice, Message, Usage};
use crate::api::streaming::{ChatStream, ChatStreamResponse, MessageDelta, SseData, StreamChoice};
use crate::client::{with_retry, CancelToken, HttpClient};
use crate::error::{Result, RouterError};
use crate::provider::instance::InstanceContext;
use crate::provider::normalize::{
    new_request_id, parse_chunk, spawn_stream, usage_when_finished, StreamStep,
};
use crate::provider::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    temperature: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    top_p: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    object: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    system_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    index: u32,
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    object: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    system_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_zero_f32(value: &f32) -> bool {
    *value == 0.0
}

/// Client for one OpenAI-compatible instance
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    ctx: InstanceContext,
}

impl OpenAiProvider {
    pub fn new(ctx: InstanceContext) -> Self {
        Self { ctx }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.ctx.base_url())
    }

    fn build_request<'a>(
        &self,
        request: &'a ChatRequest,
        model: &'a str,
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.ctx.max_tokens(request),
            temperature: self.ctx.temperature(request),
            top_p: self.ctx.config.top_p,
            stream,
        }
    }
}

fn normalize_response(response: CompletionResponse) -> Result<ChatResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| RouterError::Response("Upstream returned no choices".to_string()))?;

    let finish_reason = choice.finish_reason.unwrap_or_default();
    let usage = usage_when_finished(&finish_reason, response.usage).unwrap_or_default();

    Ok(ChatResponse {
        id: new_request_id(),
        object: response.object,
        created: response.created,
        model: response.model,
        choices: vec![Choice {
            index: choice.index,
            message: Message {
                role: choice.message.role.unwrap_or_else(|| "assistant".to_string()),
                content: choice.message.content.unwrap_or_default(),
                reasoning_content: choice.message.reasoning_content.unwrap_or_default(),
            },
            finish_reason,
        }],
        usage,
        system_fingerprint: response.system_fingerprint.unwrap_or_default(),
        provider: PROVIDER.to_string(),
    })
}

fn normalize_chunk(chunk: CompletionChunk) -> ChatStreamResponse {
    let choices = chunk
        .choices
        .into_iter()
        .take(1)
        .map(|choice| StreamChoice {
            index: choice.index,
            delta: MessageDelta {
                role: choice.delta.role.unwrap_or_default(),
                content: choice.delta.content.unwrap_or_default(),
                reasoning_content: choice.delta.reasoning_content.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
        .collect();

    ChatStreamResponse {
        id: new_request_id(),
        object: chunk.object,
        created: chunk.created,
        model: chunk.model,
        choices,
        system_fingerprint: chunk.system_fingerprint.unwrap_or_default(),
        usage: chunk.usage,
        provider: PROVIDER.to_string(),
    }
}

fn stream_step(data: SseData) -> Result<StreamStep> {
    match data {
        SseData::Done => Ok(StreamStep::Stop),
        SseData::Payload(payload) => {
            let chunk: CompletionChunk = parse_chunk(&payload)?;
            Ok(StreamStep::Emit(normalize_chunk(chunk)))
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatResponse> {
        let (model, key) = self.ctx.prepare(request, cancel).await?;
        let body = self.build_request(request, &model, false);
        let headers = HttpClient::bearer_headers(&key)?;
        let url = self.endpoint();
        let label = self.ctx.id();

        debug!(instance = %label, model = %model, "Sending chat completion");

        let response: CompletionResponse =
            with_retry(self.ctx.retry_policy(), cancel, &label, || {
                self.ctx
                    .http
                    .post_json(&url, &body, headers.clone(), self.ctx.timeout(), PROVIDER)
            })
            .await?;

        normalize_response(response)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<ChatStream> {
        let (model, key) = self.ctx.prepare(request, cancel).await?;
        let body = self.build_request(request, &model, true);
        let headers = HttpClient::bearer_headers(&key)?;
        let url = self.endpoint();
        let label = self.ctx.id();

        debug!(instance = %label, model = %model, "Opening chat stream");

        let events = with_retry(self.ctx.retry_policy(), cancel, &label, || {
            self.ctx
                .http
                .post_sse(&url, &body, headers.clone(), self.ctx.timeout(), PROVIDER)
        })
        .await?;

        Ok(spawn_stream(label, events, cancel.clone(), stream_step))
    }
}
