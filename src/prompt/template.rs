//! Prompt Templates
//!
//! A template is a list of chat messages whose content may reference
//! variables as `{{.name}}`, `{{ name }}` or `{{.user.name}}`.

use crate::api::completion::{ChatRequest, Message};
use crate::error::{Result, RouterError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Stored prompt: metadata plus the messages it expands to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Display name; the storage path is what identifies a template
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Variable names mapped to a short description
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub messages: Vec<Message>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Document a variable the messages expect
    pub fn with_variable(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.variables.insert(name.into(), description.into());
        self
    }

    /// Copy of this template with every placeholder replaced from `vars`.
    ///
    /// `vars` must be a JSON object. Strings are inserted verbatim, other
    /// values as JSON, `null` as nothing. A placeholder without a value is
    /// an error.
    pub fn render(&self, vars: &Value) -> Result<PromptTemplate> {
        let vars = vars
            .as_object()
            .ok_or_else(|| RouterError::Template("variables must be a JSON object".to_string()))?;

        let messages = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, message)| {
                let content = substitute(&message.content, vars)
                    .map_err(|e| RouterError::Template(format!("message {}: {}", i, e)))?;
                Ok(Message {
                    content,
                    ..message.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PromptTemplate {
            name: self.name.clone(),
            description: self.description.clone(),
            variables: self.variables.clone(),
            messages,
        })
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Chat request carrying this template's messages
    pub fn into_request(self) -> ChatRequest {
        ChatRequest::new(self.messages)
    }
}

fn substitute(text: &str, vars: &Map<String, Value>) -> std::result::Result<String, String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let path = &caps[1];
        match lookup(vars, path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            Some(value) => value.to_string(),
            None => {
                missing.get_or_insert_with(|| path.to_string());
                String::new()
            }
        }
    });
    let rendered = rendered.into_owned();

    match missing {
        Some(path) => Err(format!("variable '{}' has no value", path)),
        None => Ok(rendered),
    }
}

fn lookup<'a>(vars: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = vars.get(segments.next()?)?;
    segments.try_fold(first, |value, key| value.get(key))
}
