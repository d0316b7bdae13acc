//! Streaming Support
//!
//! Normalized stream deltas, SSE line decoding and chunk accumulation.

use crate::api::completion::{ChatResponse, Choice, Message, Usage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receiving half of a normalized chat stream.
///
/// The producer sends an `Err` item at most once, right before closing, when
/// the upstream fails mid-stream. A closed channel without an error is a
/// clean completion.
pub type ChatStream = mpsc::Receiver<crate::error::Result<ChatStreamResponse>>;

/// A normalized streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamResponse {
    /// Chunk ID
    pub id: String,

    /// Object type
    pub object: String,

    /// Creation timestamp
    pub created: i64,

    /// Model name
    pub model: String,

    /// Choices with deltas
    #[serde(default)]
    pub choices: Vec<StreamChoice>,

    /// Upstream system fingerprint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_fingerprint: String,

    /// Usage info (only on terminal chunks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Provider that served the stream
    pub provider: String,
}

impl ChatStreamResponse {
    /// Finish reason of the first choice, if any
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.finish_reason.as_str())
            .filter(|r| !r.is_empty())
    }
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    /// Choice index
    pub index: u32,

    /// The delta (partial message)
    pub delta: MessageDelta,

    /// Finish reason (set on the terminal chunk)
    #[serde(default)]
    pub finish_reason: String,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Role (usually only in first chunk)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,

    /// Visible content delta
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Reasoning content delta
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
}

/// Folds stream chunks back into a single response
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Accumulated content
    pub content: String,

    /// Accumulated reasoning content
    pub reasoning_content: String,

    /// Role from first chunk
    pub role: Option<String>,

    /// Finish reason from last chunk
    pub finish_reason: Option<String>,

    /// Response ID
    pub id: Option<String>,

    /// Model name
    pub model: Option<String>,

    /// Created timestamp
    pub created: Option<i64>,

    /// Provider name
    pub provider: Option<String>,

    /// Usage from final chunk
    pub usage: Option<Usage>,
}

impl StreamAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming chunk
    pub fn process_chunk(&mut self, chunk: &ChatStreamResponse) {
        // Store metadata from first chunk
        if self.id.is_none() {
            self.id = Some(chunk.id.clone());
            self.model = Some(chunk.model.clone());
            self.created = Some(chunk.created);
            self.provider = Some(chunk.provider.clone());
        }

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in &chunk.choices {
            if !choice.delta.role.is_empty() && self.role.is_none() {
                self.role = Some(choice.delta.role.clone());
            }

            self.content.push_str(&choice.delta.content);
            self.reasoning_content
                .push_str(&choice.delta.reasoning_content);

            if !choice.finish_reason.is_empty() {
                self.finish_reason = Some(choice.finish_reason.clone());
            }
        }
    }

    /// Convert to a final response
    pub fn into_response(self) -> ChatResponse {
        ChatResponse {
            id: self.id.unwrap_or_default(),
            object: "chat.completion".to_string(),
            created: self.created.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: self.role.unwrap_or_else(|| "assistant".to_string()),
                    content: self.content,
                    reasoning_content: self.reasoning_content,
                },
                finish_reason: self.finish_reason.unwrap_or_default(),
            }],
            usage: self.usage.unwrap_or_default(),
            system_fingerprint: String::new(),
            provider: self.provider.unwrap_or_default(),
        }
    }
}

/// A decoded SSE `data:` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    /// JSON (or other) payload
    Payload(String),

    /// The `[DONE]` sentinel
    Done,
}

/// Extract the data payload of a single SSE line
pub fn parse_sse_line(line: &str) -> Option<SseData> {
    // Skip empty lines and comments
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    // Ignore other fields (event:, id:, retry:)
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseData::Done);
    }

    Some(SseData::Payload(data.to_string()))
}

/// Incremental line splitter for SSE bodies arriving in arbitrary chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete data payload
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = parse_sse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a trailing line without a newline
    pub fn finish(&mut self) -> Option<SseData> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}
