//! Prompt Module
//!
//! JSON prompt templates with variable substitution, stored on disk.

pub mod store;
pub mod template;

pub use store::{PromptStore, DEFAULT_PROMPT_DIR};
pub use template::PromptTemplate;
