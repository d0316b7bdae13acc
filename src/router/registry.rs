//! Provider Registry
//!
//! Selects an enabled instance round-robin and hands out vendor clients that
//! share per-instance counters and rate limiters.

use crate::api::{ChatRequest, ChatResponse, ChatStream};
use crate::client::{parse_limit, CancelToken, HttpClient, RateLimiter};
use crate::config::{AiConfig, ConfigLoader, ProviderConfig, ProviderInstanceConfig};
use crate::error::{Result, RouterError};
use crate::prompt::PromptStore;
use crate::provider::instance::{instance_id, InstanceContext};
use crate::provider::{self, Provider};
use crate::router::round_robin::{InstanceCounters, RoundRobin};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One enabled instance of an enabled provider
#[derive(Debug, Clone, Copy)]
pub struct EnabledInstance<'a> {
    pub provider: &'a str,
    pub provider_config: &'a ProviderConfig,
    pub instance: &'a ProviderInstanceConfig,
}

/// Enabled instances in provider-name order, then configuration order
pub fn enabled_instances(config: &AiConfig) -> Vec<EnabledInstance<'_>> {
    config
        .providers
        .iter()
        .filter(|(_, provider)| provider.enabled)
        .flat_map(|(name, provider)| {
            provider
                .instances
                .iter()
                .filter(|instance| instance.enabled)
                .map(move |instance| EnabledInstance {
                    provider: name,
                    provider_config: provider,
                    instance,
                })
        })
        .collect()
}

/// Check every enabled instance's rate limit string
fn validate(config: &AiConfig) -> Result<()> {
    for entry in enabled_instances(config) {
        if let Some(spec) = entry.instance.rate_limit.as_deref() {
            if !spec.trim().is_empty() {
                parse_limit(spec)?;
            }
        }
    }
    Ok(())
}

/// Routes chat calls across every enabled provider instance
pub struct Registry {
    /// Current configuration snapshot
    config: RwLock<Arc<AiConfig>>,

    /// Global rotation over enabled instances
    instance_counter: RoundRobin,

    /// Key/model counters keyed by `"provider:instance"`
    counters: RwLock<HashMap<String, Arc<InstanceCounters>>>,

    /// Rate limiters keyed by `"provider:instance"`
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,

    /// Shared HTTP client
    http: HttpClient,
}

impl Registry {
    /// Create a registry over `config`
    pub fn new(config: AiConfig) -> Result<Self> {
        Self::with_http_client(config, HttpClient::new()?)
    }

    /// Create a registry that sends requests through `http`
    pub fn with_http_client(config: AiConfig, http: HttpClient) -> Result<Self> {
        validate(&config)?;

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            instance_counter: RoundRobin::new(),
            counters: RwLock::new(HashMap::new()),
            limiters: RwLock::new(HashMap::new()),
            http,
        })
    }

    /// Create a registry from the default configuration sources
    pub fn from_default_config() -> Result<Self> {
        Self::new(ConfigLoader::new()?.into_config())
    }

    /// Create a registry from a specific config file
    pub fn from_config_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(ConfigLoader::from_path(path)?.into_config())
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<AiConfig> {
        self.config.read().clone()
    }

    /// Replace the configuration; counters and unchanged limiters are kept.
    ///
    /// An invalid rate limit leaves the previous snapshot in place.
    pub fn update_config(&self, config: AiConfig) -> Result<()> {
        validate(&config)?;

        let instances = enabled_instances(&config).len();
        *self.config.write() = Arc::new(config);
        info!(instances, "Provider configuration updated");
        Ok(())
    }

    /// Prompt templates under the configured `prompt_dir`
    pub fn prompts(&self) -> PromptStore {
        PromptStore::from_config(&self.config())
    }

    /// Re-read `loader`'s sources and apply the result
    pub fn reload(&self, loader: &mut ConfigLoader) -> Result<()> {
        let config = loader.reload()?.clone();
        self.update_config(config)
    }

    /// Key/model counters of an instance, if it has been selected before
    pub fn instance_counters(&self, provider: &str, instance: &str) -> Option<Arc<InstanceCounters>> {
        self.counters
            .read()
            .get(&instance_id(provider, instance))
            .cloned()
    }

    /// Number of instance selections made so far
    pub fn selections(&self) -> u64 {
        self.instance_counter.count()
    }

    /// Pick the next enabled instance and gather its shared state
    pub fn select_instance(&self) -> Result<InstanceContext> {
        let config = self.config();
        let instances = enabled_instances(&config);

        let index = self
            .instance_counter
            .next_index_after(instances.len())
            .ok_or(RouterError::NoEnabledInstance)?;
        let selected = instances[index];

        info!(
            provider = selected.provider,
            instance = %selected.instance.name,
            "Using provider instance"
        );

        let kind = selected
            .provider_config
            .kind_for(selected.provider)
            .ok_or_else(|| RouterError::UnsupportedProvider(selected.provider.to_string()))?;

        let id = instance_id(selected.provider, &selected.instance.name);
        let counters = self.counters_for(&id);
        let limiter = self.limiter_for(&id, selected.instance.rate_limit.as_deref())?;

        Ok(InstanceContext {
            provider: selected.provider.to_string(),
            kind,
            config: Arc::new(selected.instance.clone()),
            counters,
            limiter,
            http: self.http.clone(),
        })
    }

    /// Pick the next enabled instance and build its vendor client
    pub fn select(&self) -> Result<Box<dyn Provider>> {
        Ok(provider::for_instance(self.select_instance()?))
    }

    fn counters_for(&self, id: &str) -> Arc<InstanceCounters> {
        if let Some(counters) = self.counters.read().get(id) {
            return counters.clone();
        }

        self.counters
            .write()
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(instance = id, "Creating round-robin counters");
                Arc::new(InstanceCounters::new())
            })
            .clone()
    }

    fn limiter_for(&self, id: &str, spec: Option<&str>) -> Result<Arc<RateLimiter>> {
        let wanted = spec.map(str::trim).unwrap_or_default();

        if let Some(limiter) = self.limiters.read().get(id) {
            if limiter.spec() == wanted {
                return Ok(limiter.clone());
            }
        }

        let mut limiters = self.limiters.write();
        if let Some(limiter) = limiters.get(id) {
            if limiter.spec() == wanted {
                return Ok(limiter.clone());
            }
        }

        debug!(instance = id, rate_limit = wanted, "Creating rate limiter");
        let limiter = Arc::new(RateLimiter::from_spec(Some(wanted))?);
        limiters.insert(id.to_string(), limiter.clone());
        Ok(limiter)
    }
}

#[async_trait]
impl Provider for Registry {
    async fn chat(&self, request: &ChatRequest, cancel: &CancelToken) -> Result<ChatResponse> {
        let provider = self.select()?;
        provider.chat(request, cancel).await
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<ChatStream> {
        let provider = self.select()?;
        provider.chat_stream(request, cancel).await
    }
}
