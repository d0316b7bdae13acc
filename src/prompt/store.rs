//! Prompt Template Store
//!
//! Templates live as JSON files under a root directory. A template's path is
//! its file path relative to the root without `.json`, so
//! `stories/midnight_store` is `<root>/stories/midnight_store.json`.

use crate::config::AiConfig;
use crate::error::{Result, RouterError};
use crate::prompt::template::PromptTemplate;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const EXTENSION: &str = "json";

/// Root used when the configuration names no `prompt_dir`
pub const DEFAULT_PROMPT_DIR: &str = "prompts";

/// File-backed prompt template storage
#[derive(Debug, Clone)]
pub struct PromptStore {
    root: PathBuf,
}

impl PromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the configured `prompt_dir`
    pub fn from_config(config: &AiConfig) -> Self {
        Self::new(
            config
                .prompt_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPT_DIR)),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a template, rendering it when `vars` is given
    pub fn get(&self, path: &str, vars: Option<&Value>) -> Result<PromptTemplate> {
        let file = self.file_for(path)?;
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RouterError::PromptNotFound(path.to_string()))
            }
            Err(e) => {
                return Err(RouterError::Config(format!(
                    "Failed to read {}: {}",
                    file.display(),
                    e
                )))
            }
        };

        let template: PromptTemplate = serde_json::from_str(&content).map_err(|e| {
            RouterError::Config(format!("Failed to parse {}: {}", file.display(), e))
        })?;
        debug!(path, "Loaded prompt template");

        match vars {
            Some(vars) => template.render(vars),
            None => Ok(template),
        }
    }

    /// Template paths under `prefix` (everything for `""`), sorted
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let search = if prefix.trim().is_empty() {
            self.root.clone()
        } else {
            self.dir_for(prefix)?
        };

        let mut names = Vec::new();
        if search.is_dir() {
            collect(&self.root, &search, &mut names)?;
        }
        names.sort();
        Ok(names)
    }

    /// Store a new template; fails if one already exists at `path`
    pub fn create(&self, path: &str, template: &PromptTemplate) -> Result<()> {
        let file = self.file_for(path)?;
        validate(template)?;

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut handle = match OpenOptions::new().write(true).create_new(true).open(&file) {
            Ok(handle) => handle,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RouterError::PromptExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        handle.write_all(encode(template)?.as_bytes())?;

        info!(path, "Created prompt template");
        Ok(())
    }

    /// Replace an existing template
    pub fn update(&self, path: &str, template: &PromptTemplate) -> Result<()> {
        let file = self.file_for(path)?;
        validate(template)?;

        if !file.is_file() {
            return Err(RouterError::PromptNotFound(path.to_string()));
        }
        fs::write(&file, encode(template)?)?;

        info!(path, "Updated prompt template");
        Ok(())
    }

    /// Move a template to a new path; the target must be free
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.file_for(from)?;
        let target = self.file_for(to)?;

        if !source.is_file() {
            return Err(RouterError::PromptNotFound(from.to_string()));
        }
        if target.exists() {
            return Err(RouterError::PromptExists(to.to_string()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;

        info!(from, to, "Renamed prompt template");
        Ok(())
    }

    /// Remove a template, or a whole directory of templates
    pub fn delete(&self, path: &str) -> Result<()> {
        let file = self.file_for(path)?;
        if file.is_file() {
            fs::remove_file(&file)?;
            info!(path, "Deleted prompt template");
            return Ok(());
        }

        let dir = self.dir_for(path)?;
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            info!(path, "Deleted prompt template directory");
            return Ok(());
        }

        Err(RouterError::PromptNotFound(path.to_string()))
    }

    fn file_for(&self, path: &str) -> Result<PathBuf> {
        let mut file = self.dir_for(path)?.into_os_string();
        file.push(".");
        file.push(EXTENSION);
        Ok(PathBuf::from(file))
    }

    fn dir_for(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim();
        if path.is_empty() {
            return Err(RouterError::Config(
                "Prompt template path cannot be empty".to_string(),
            ));
        }

        let mut resolved = self.root.clone();
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(RouterError::Config(format!(
                    "Invalid prompt template path '{}'",
                    path
                )));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

fn validate(template: &PromptTemplate) -> Result<()> {
    if template.messages.is_empty() {
        return Err(RouterError::Config(
            "Prompt template must have at least one message".to_string(),
        ));
    }
    Ok(())
}

fn encode(template: &PromptTemplate) -> Result<String> {
    serde_json::to_string_pretty(template)
        .map_err(|e| RouterError::Config(format!("Failed to encode prompt template: {}", e)))
}

fn collect(root: &Path, dir: &Path, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            collect(root, &path, names)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        names.push(name);
    }
    Ok(())
}
