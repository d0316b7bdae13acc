//! Gemini generate-content client.

use crate::api::completion::{ChatRequest, ChatResponse, Choice, Message, Usage};
use crate::api::streaming::{ChatStream, ChatStreamResponse, MessageDelta, SseData, StreamChoice};
use crate::client::{with_retry, CancelToken, HttpClient};
use crate::error::{Result, RouterError};
use crate::provider::instance::InstanceContext;
use crate::provider::normalize::{
    new_request_id, parse_chunk, spawn_stream, unix_now, usage_when_finished, SplitText,
    StreamStep,
};
use crate::provider::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Finish reasons after which no further chunks are read
const TERMINAL_REASONS: [&str; 2] = ["STOP", "MAX_TOKENS"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "is_zero")]
    max_output_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "is_zero")]
    top_k: u32,
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<UsageMetadata> for Usage {
    fn from(meta: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: meta.prompt_token_count,
            completion_tokens: meta.candidates_token_count,
            total_tokens: meta.total_token_count,
        }
    }
}

impl Candidate {
    fn split_text(&self) -> SplitText {
        let mut split = SplitText::default();
        if let Some(content) = &self.content {
            for part in content.parts.iter().filter(|p| !p.text.is_empty()) {
                split.push(&part.text, part.thought);
            }
        }
        split
    }

    fn finish_reason(&self) -> String {
        self.finish_reason.clone().unwrap_or_default()
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Client for one Gemini instance
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    ctx: InstanceContext,
}

impl GeminiProvider {
    pub fn new(ctx: InstanceContext) -> Self {
        Self { ctx }
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.ctx.base_url(),
                model
            )
        } else {
            format!("{}/models/{}:generateContent", self.ctx.base_url(), model)
        }
    }

    fn build_request<'a>(&self, request: &'a ChatRequest) -> GenerateContentRequest<'a> {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            let part = TextPart {
                text: &message.content,
            };
            match message.role.as_str() {
                "system" => system_parts.push(part),
                "assistant" | "model" => contents.push(Content {
                    role: Some("model"),
                    parts: vec![part],
                }),
                _ => contents.push(Content {
                    role: Some("user"),
                    parts: vec![part],
                }),
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then_some(Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: GenerationConfig {
                temperature: self.ctx.temperature(request),
                max_output_tokens: self.ctx.max_tokens(request),
                top_p: self.ctx.config.top_p,
                top_k: self.ctx.config.top_k,
                thinking_config: ThinkingConfig {
                    include_thoughts: true,
                },
            },
        }
    }
}

fn normalize_response(response: GenerateContentResponse, model: &str) -> Result<ChatResponse> {
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| RouterError::Response("Upstream returned no candidates".to_string()))?;

    let split = candidate.split_text();
    let finish_reason = candidate.finish_reason();
    let usage = usage_when_finished(&finish_reason, response.usage_metadata.map(Usage::from))
        .unwrap_or_default();

    Ok(ChatResponse {
        id: new_request_id(),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: "assistant".to_string(),
                content: split.content,
                reasoning_content: split.reasoning,
            },
            finish_reason,
        }],
        usage,
        system_fingerprint: String::new(),
        provider: PROVIDER.to_string(),
    })
}

fn stream_step(data: SseData, model: &str) -> Result<StreamStep> {
    let payload = match data {
        SseData::Done => return Ok(StreamStep::Stop),
        SseData::Payload(payload) => payload,
    };

    let chunk: GenerateContentResponse = parse_chunk(&payload)?;
    let Some(candidate) = chunk.candidates.first() else {
        return Ok(StreamStep::Skip);
    };

    let split = candidate.split_text();
    let finish_reason = candidate.finish_reason();
    if split.is_empty() && finish_reason.is_empty() {
        return Ok(StreamStep::Skip);
    }

    let usage = usage_when_finished(&finish_reason, chunk.usage_metadata.map(Usage::from));
    let last = TERMINAL_REASONS.contains(&finish_reason.as_str());

    let normalized = ChatStreamResponse {
        id: new_request_id(),
        object: "chat.completion.chunk".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![StreamChoice {
            index: 0,
            delta: MessageDelta {
                role: "assistant".to_string(),
                content: split.content,
                reasoning_content: split.reasoning,
            },
            finish_reason,
        }],
        system_fingerprint: String::new(),
        usage,
        provider: PROVIDER.to_string(),
    };

    Ok(if last {
        StreamStep::EmitLast(normalized)
    } else {
        StreamStep::Emit(normalized)
    })
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatResponse> {
        let (model, key) = self.ctx.prepare(request, cancel).await?;
        let body = self.build_request(request);
        let headers = HttpClient::api_key_headers(API_KEY_HEADER, &key)?;
        let url = self.endpoint(&model, false);
        let label = self.ctx.id();

        debug!(instance = %label, model = %model, "Sending generate content");

        let response: GenerateContentResponse =
            with_retry(self.ctx.retry_policy(), cancel, &label, || {
                self.ctx
                    .http
                    .post_json(&url, &body, headers.clone(), self.ctx.timeout(), PROVIDER)
            })
            .await?;

        normalize_response(response, &model)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<ChatStream> {
        let (model, key) = self.ctx.prepare(request, cancel).await?;
        let body = self.build_request(request);
        let headers = HttpClient::api_key_headers(API_KEY_HEADER, &key)?;
        let url = self.endpoint(&model, true);
        let label = self.ctx.id();

        debug!(instance = %label, model = %model, "Opening generate content stream");

        let events = with_retry(self.ctx.retry_policy(), cancel, &label, || {
            self.ctx
                .http
                .post_sse(&url, &body, headers.clone(), self.ctx.timeout(), PROVIDER)
        })
        .await?;

        Ok(spawn_stream(label, events, cancel.clone(), move |data| {
            stream_step(data, &model)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::provider::instance::test_support::context;
    use mockito::Matcher;
    use serde_json::json;

    fn provider(base_url: &str, max_retries: u32) -> GeminiProvider {
        GeminiProvider::new(context(ProviderKind::Gemini, base_url, |c| {
            c.max_retries = max_retries;
            c.temperature = 0.5;
            c.top_p = 0.25;
            c.top_k = 40;
            c.max_tokens = 256;
        }))
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![
            Message::system("Answer in French."),
            Message::user("Hello"),
            Message::assistant("Bonjour"),
            Message::user("How are you?"),
        ])
    }

    fn sse(chunks: &[serde_json::Value]) -> String {
        chunks
            .iter()
            .map(|c| format!("data: {}\r\n\r\n", c))
            .collect()
    }

    #[test]
    fn test_request_body_maps_roles() {
        let p = provider("http://localhost", 0);
        let req = request();
        let body = serde_json::to_value(p.build_request(&req)).unwrap();

        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hello"}]},
                    {"role": "model", "parts": [{"text": "Bonjour"}]},
                    {"role": "user", "parts": [{"text": "How are you?"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Answer in French."}]},
                "generationConfig": {
                    "temperature": 0.5,
                    "maxOutputTokens": 256,
                    "topP": 0.25,
                    "topK": 40,
                    "thinkingConfig": {"includeThoughts": true}
                }
            })
        );
    }

    #[tokio::test]
    async fn test_chat_separates_thoughts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/test-model:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(
                json!({"generationConfig": {"thinkingConfig": {"includeThoughts": true}}}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [
                            {"text": "Considering greeting. ", "thought": true},
                            {"text": "Ça va "},
                            {"text": "bien."}
                        ]},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4, "totalTokenCount": 16}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = provider(&server.url(), 0)
            .chat(&request(), &CancelToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.content(), Some("Ça va bien."));
        assert_eq!(response.reasoning(), Some("Considering greeting. "));
        assert_eq!(response.choices[0].finish_reason, "STOP");
        assert_eq!(response.model, "test-model");
        assert_eq!(response.object, "chat.completion");
        assert_eq!(
            response.usage,
            Usage {
                prompt_tokens: 12,
                completion_tokens: 4,
                total_tokens: 16
            }
        );
        assert_eq!(response.provider, "gemini");
    }

    #[tokio::test]
    async fn test_chat_without_candidates_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let err = provider(&server.url(), 0)
            .chat(&request(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Response(_)));
    }

    #[tokio::test]
    async fn test_chat_retries_every_attempt() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(503)
            .with_body(r#"{"error":{"status":"UNAVAILABLE"}}"#)
            .expect(4)
            .create_async()
            .await;

        let err = provider(&server.url(), 3)
            .chat(&request(), &CancelToken::new())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, RouterError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_stream_closes_after_stop() {
        let body = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Planning", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": []}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "Bon"}]}}]}),
            json!({
                "candidates": [{"content": {"parts": [{"text": "jour"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
            }),
            json!({"candidates": [{"content": {"parts": [{"text": "after stop"}]}}]}),
        ]);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/test-model:streamGenerateContent")
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let mut stream = provider(&server.url(), 0)
            .chat_stream(&request(), &CancelToken::new())
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(item) = stream.recv().await {
            chunks.push(item.unwrap());
        }

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].choices[0].delta.reasoning_content, "Planning");
        assert_eq!(chunks[0].choices[0].delta.content, "");
        assert!(chunks[0].usage.is_none());
        assert_eq!(chunks[1].choices[0].delta.content, "Bon");
        assert_eq!(chunks[2].choices[0].delta.content, "jour");
        assert_eq!(chunks[2].finish_reason(), Some("STOP"));
        assert_eq!(chunks[2].usage.unwrap().total_tokens, 5);
        assert!(chunks.iter().all(|c| c.model == "test-model" && c.provider == "gemini"));
    }

    #[tokio::test]
    async fn test_stream_closes_after_max_tokens() {
        let body = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Once upon"}]}}]}),
            json!({
                "candidates": [{"content": {"parts": [{"text": " a time"}]}, "finishReason": "MAX_TOKENS"}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 8, "totalTokenCount": 12}
            }),
            json!({"candidates": [{"content": {"parts": [{"text": "ignored"}]}}]}),
        ]);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/test-model:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let mut stream = provider(&server.url(), 0)
            .chat_stream(&request(), &CancelToken::new())
            .await
            .unwrap();

        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.choices[0].delta.content, "Once upon");

        let last = stream.recv().await.unwrap().unwrap();
        assert_eq!(last.choices[0].delta.content, " a time");
        assert_eq!(last.finish_reason(), Some("MAX_TOKENS"));
        assert_eq!(last.usage.unwrap().total_tokens, 12);

        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_forwards_other_finish_reasons() {
        let body = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "partial"}]}}]}),
            json!({"candidates": [{"finishReason": "SAFETY"}]}),
        ]);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/test-model:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let mut stream = provider(&server.url(), 0)
            .chat_stream(&request(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(
            stream.recv().await.unwrap().unwrap().choices[0].delta.content,
            "partial"
        );
        let last = stream.recv().await.unwrap().unwrap();
        assert_eq!(last.finish_reason(), Some("SAFETY"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_stops_when_cancelled() {
        let cancel = CancelToken::new();
        let body = sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "one"}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "two"}]}}]}),
        ]);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/test-model:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let mut stream = provider(&server.url(), 0)
            .chat_stream(&request(), &cancel)
            .await
            .unwrap();
        cancel.cancel();

        // Whatever was already buffered may still arrive, then the channel closes
        let mut received = 0;
        while let Some(item) = stream.recv().await {
            assert!(item.is_ok());
            received += 1;
        }
        assert!(received <= 2);
    }
}
