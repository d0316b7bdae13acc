//! Per-instance state handed to a vendor client.

use crate::api::completion::ChatRequest;
use crate::client::{CancelToken, HttpClient, RateLimiter, RetryPolicy};
use crate::config::{ProviderInstanceConfig, ProviderKind};
use crate::error::{Result, RouterError};
use crate::router::round_robin::InstanceCounters;
use std::sync::Arc;
use std::time::Duration;

/// Everything a vendor client needs for one call
#[derive(Debug, Clone)]
pub struct InstanceContext {
    /// Provider name as configured
    pub provider: String,

    /// Upstream protocol
    pub kind: ProviderKind,

    /// Snapshot of the instance configuration
    pub config: Arc<ProviderInstanceConfig>,

    /// Key and model rotation, shared across calls
    pub counters: Arc<InstanceCounters>,

    /// Token bucket, shared across calls
    pub limiter: Arc<RateLimiter>,

    /// Shared HTTP client
    pub http: HttpClient,
}

impl InstanceContext {
    /// `"{provider}:{instance}"`
    pub fn id(&self) -> String {
        instance_id(&self.provider, &self.config.name)
    }

    /// Request model if set, otherwise the next configured model
    pub fn resolve_model(&self, request: &ChatRequest) -> Result<String> {
        if let Some(model) = request.requested_model() {
            return Ok(model.to_string());
        }
        self.counters
            .models
            .pick(&self.config.models)
            .cloned()
            .ok_or_else(|| RouterError::NoModelsAvailable(self.id()))
    }

    /// Next API key in rotation
    pub fn next_key(&self) -> Result<String> {
        self.counters
            .keys
            .pick(&self.config.keys)
            .cloned()
            .ok_or_else(|| RouterError::NoKeysAvailable(self.id()))
    }

    /// Resolve model and key, then wait for a rate limit token
    pub async fn prepare(
        &self,
        request: &ChatRequest,
        cancel: &CancelToken,
    ) -> Result<(String, String)> {
        let model = self.resolve_model(request)?;
        let key = self.next_key()?;
        self.limiter.wait(cancel).await?;
        Ok((model, key))
    }

    pub fn max_tokens(&self, request: &ChatRequest) -> u32 {
        request.max_tokens.unwrap_or(self.config.max_tokens)
    }

    pub fn temperature(&self, request: &ChatRequest) -> f32 {
        request.temperature.unwrap_or(self.config.temperature)
    }

    /// Per-request deadline; a configured `0` means none
    pub fn timeout(&self) -> Option<Duration> {
        match self.config.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::for_instance(&self.config)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }
}

/// Key under which an instance's counters and limiter are stored
pub fn instance_id(provider: &str, instance: &str) -> String {
    format!("{}:{}", provider, instance)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Context for a single instance pointing at `base_url`
    pub fn context(
        kind: ProviderKind,
        base_url: &str,
        configure: impl FnOnce(&mut ProviderInstanceConfig),
    ) -> InstanceContext {
        let mut config = ProviderInstanceConfig::new("test-01", base_url);
        config.keys = vec!["test-key".to_string()];
        config.models = vec!["test-model".to_string()];
        config.retry_delay_ms = 10;
        configure(&mut config);

        InstanceContext {
            provider: kind.as_str().to_string(),
            kind,
            config: Arc::new(config),
            counters: Arc::new(InstanceCounters::new()),
            limiter: Arc::new(RateLimiter::unlimited()),
            http: HttpClient::new().unwrap(),
        }
    }
}
