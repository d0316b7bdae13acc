//! Configuration Loader
//!
//! Handles loading and merging provider configurations from multiple sources.

use crate::config::provider::AiConfig;
use crate::error::{Result, RouterError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: AiConfig,

    /// Explicit file passed to [`ConfigLoader::from_path`], re-read on reload
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self {
            config: AiConfig::default(),
            explicit_path: None,
        };

        // Load built-in defaults first
        loader.load_builtin_defaults()?;

        // Then load from file system (can override built-ins)
        loader.load_from_default_paths()?;
        loader.config.resolve_env_keys();

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self {
            config: AiConfig::default(),
            explicit_path: Some(path.as_ref().to_path_buf()),
        };

        loader.load_builtin_defaults()?;
        loader.load_from_file(path)?;
        loader.config.resolve_env_keys();

        Ok(loader)
    }

    /// Re-read every source this loader was built from
    pub fn reload(&mut self) -> Result<&AiConfig> {
        let fresh = match &self.explicit_path {
            Some(path) => Self::from_path(path)?,
            None => Self::new()?,
        };
        self.config = fresh.config;
        info!(
            providers = self.config.providers.len(),
            "Configuration reloaded"
        );
        Ok(&self.config)
    }

    /// Load built-in provider defaults
    fn load_builtin_defaults(&mut self) -> Result<()> {
        let defaults = include_str!("../../providers.json");
        let config: AiConfig = serde_json::from_str(defaults).map_err(|e| {
            RouterError::Config(format!("Failed to parse built-in providers.json: {}", e))
        })?;

        self.merge_config(config);
        Ok(())
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        let paths = Self::get_config_paths();

        for path in paths {
            if path.exists() {
                self.load_from_file(&path)?;
            }
        }

        Ok(())
    }

    /// Get list of config paths to check, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment-specific file in ./configs
        let profile = match std::env::var("LLMROUTE_ENV").as_deref() {
            Ok("prod") | Ok("production") => "config.prod.json",
            _ => "config.local.json",
        };
        paths.push(PathBuf::from("configs").join(profile));

        // 2. Current directory
        paths.push(PathBuf::from("llmroute.json"));

        // 3. Environment variable
        if let Ok(custom_path) = std::env::var("LLMROUTE_CONFIG") {
            paths.push(PathBuf::from(custom_path));
        }

        // 4. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmroute").join("config.json"));
        }

        // 5. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llmroute").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: AiConfig = serde_json::from_str(&content).map_err(|e| {
            RouterError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), "Loaded configuration file");
        self.merge_config(config);
        Ok(())
    }

    /// Merge another config into this one (later configs override earlier)
    fn merge_config(&mut self, other: AiConfig) {
        for (name, provider) in other.providers {
            self.config.providers.insert(name, provider);
        }
        if other.prompt_dir.is_some() {
            self.config.prompt_dir = other.prompt_dir;
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> AiConfig {
        self.config
    }
}
