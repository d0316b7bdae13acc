//! Chat Completion API
//!
//! Vendor-agnostic request and response envelopes.

use serde::{Deserialize, Serialize};

/// A message in a chat conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user" or "assistant"
    pub role: String,

    /// Visible message text
    #[serde(default)]
    pub content: String,

    /// Reasoning/thinking text, kept apart from `content`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
}

impl Message {
    /// Create a message with the given role and content
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            reasoning_content: String::new(),
        }
    }

    /// Shorthand for a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Shorthand for a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Shorthand for an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Chat request routed to whichever instance the registry selects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model override; empty picks the instance's next model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Maximum tokens override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Pin the model instead of rotating through the instance's list
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Requested model, treating an empty string as absent
    pub fn requested_model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}

/// Chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response ID, freshly generated per response
    pub id: String,

    /// Object type
    pub object: String,

    /// Creation timestamp
    pub created: i64,

    /// Model used
    pub model: String,

    /// Response choices
    pub choices: Vec<Choice>,

    /// Token usage, zero unless the upstream reported a finish reason
    pub usage: Usage,

    /// Upstream system fingerprint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_fingerprint: String,

    /// Provider that served the request
    pub provider: String,
}

impl ChatResponse {
    /// Get the first message content
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Get the first message reasoning content
    pub fn reasoning(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.message.reasoning_content.as_str())
            .filter(|r| !r.is_empty())
    }
}

/// A choice in the completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    pub index: u32,

    /// The message
    pub message: Message,

    /// Finish reason as reported upstream
    #[serde(default)]
    pub finish_reason: String,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,

    /// Completion tokens
    pub completion_tokens: u32,

    /// Total tokens
    pub total_tokens: u32,
}
