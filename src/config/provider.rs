//! Provider Configuration
//!
//! Defines the configuration schema for providers and their instances.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider configurations keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Directory holding prompt templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_dir: Option<PathBuf>,
}

/// Upstream protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions
    #[serde(rename = "openai")]
    OpenAi,

    /// Gemini generate-content
    Gemini,
}

impl ProviderKind {
    /// Infer the kind from a well-known provider name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai" => Some(ProviderKind::OpenAi),
            "gemini" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    /// Name reported in normalized responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// Configuration for a single provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Whether provider is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Protocol override (defaults from the provider name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,

    /// Provider instances
    #[serde(default)]
    pub instances: Vec<ProviderInstanceConfig>,
}

impl ProviderConfig {
    /// Resolve the protocol for this provider
    pub fn kind_for(&self, name: &str) -> Option<ProviderKind> {
        self.kind.or_else(|| ProviderKind::from_name(name))
    }
}

/// One deployment/account of a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstanceConfig {
    /// Instance name
    pub name: String,

    /// Whether instance is enabled
    #[serde(default)]
    pub enabled: bool,

    /// API base URL
    pub base_url: String,

    /// API keys, used round-robin
    #[serde(default)]
    pub keys: Vec<String>,

    /// Environment variables holding extra API keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys_env: Vec<String>,

    /// Models, used round-robin when the request names none
    #[serde(default)]
    pub models: Vec<String>,

    /// Maximum output tokens (0 leaves it to the upstream)
    #[serde(default)]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Nucleus sampling
    #[serde(default)]
    pub top_p: f32,

    /// Candidate limit (Gemini only, 0 = unlimited)
    #[serde(default)]
    pub top_k: u32,

    /// Request timeout in seconds; `0` disables the deadline
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Maximum retry attempts after the first failure
    #[serde(default)]
    pub max_retries: u32,

    /// Linear backoff step in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Rate limit such as "60/min" or "1/s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
}

fn default_timeout() -> u64 {
    60
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl ProviderInstanceConfig {
    /// Create an enabled instance with defaults for everything else
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            base_url: base_url.into(),
            keys: Vec::new(),
            keys_env: Vec::new(),
            models: Vec::new(),
            max_tokens: 0,
            temperature: 0.0,
            top_p: 0.0,
            top_k: 0,
            timeout: default_timeout(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            rate_limit: None,
        }
    }

    /// Append keys found in the `keys_env` variables, skipping duplicates
    pub fn resolve_env_keys(&mut self) {
        for env_var in &self.keys_env {
            if let Ok(key) = std::env::var(env_var) {
                if !key.is_empty() && !self.keys.contains(&key) {
                    self.keys.push(key);
                }
            }
        }
    }
}

impl AiConfig {
    /// Resolve environment-provided keys for every instance
    pub fn resolve_env_keys(&mut self) {
        for provider in self.providers.values_mut() {
            for instance in &mut provider.instances {
                instance.resolve_env_keys();
            }
        }
    }
}
