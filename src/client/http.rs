//! HTTP Client
//!
//! Shared reqwest client with status mapping and SSE body decoding.

use crate::api::streaming::{SseData, SseDecoder};
use crate::error::{Result, RouterError};
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Decoded `data:` payloads of an SSE response body
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseData>> + Send>>;

/// HTTP client shared by every provider instance
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client (connection pool is shared between clones)
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RouterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// `Authorization: Bearer <key>` plus JSON content type
    pub fn bearer_headers(api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| RouterError::Config(format!("Invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }

    /// A custom API key header plus JSON content type
    pub fn api_key_headers(name: &'static str, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(api_key)
                .map_err(|e| RouterError::Config(format!("Invalid API key format: {}", e)))?,
        );
        Ok(headers)
    }

    /// POST a JSON body and decode a JSON response
    ///
    /// `timeout` of `None` leaves the request without a deadline.
    pub async fn post_json<T, R>(
        &self,
        url: &str,
        body: &T,
        headers: HeaderMap,
        timeout: Option<Duration>,
        provider: &str,
    ) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(url, body, headers, timeout, provider).await?;

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            RouterError::Response(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                truncate(&body, 500)
            ))
        })
    }

    /// POST a JSON body and decode the response as server-sent events
    pub async fn post_sse<T>(
        &self,
        url: &str,
        body: &T,
        headers: HeaderMap,
        timeout: Option<Duration>,
        provider: &str,
    ) -> Result<SseStream>
    where
        T: Serialize + ?Sized,
    {
        use async_stream::stream;
        use futures::StreamExt;

        let response = self.send(url, body, headers, timeout, provider).await?;

        let mut byte_stream = response.bytes_stream();
        let s = stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for data in decoder.push(&bytes) {
                            yield Ok(data);
                        }
                    }
                    Err(e) => {
                        yield Err(RouterError::Stream(e.to_string()));
                        return;
                    }
                }
            }
            if let Some(data) = decoder.finish() {
                yield Ok(data);
            }
        };

        Ok(Box::pin(s))
    }

    async fn send<T>(
        &self,
        url: &str,
        body: &T,
        headers: HeaderMap,
        timeout: Option<Duration>,
        provider: &str,
    ) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        debug!(provider, url, "Sending upstream request");

        let mut builder = self.client.post(url).headers(headers).json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(provider, status, body))
    }
}

/// Map a non-success upstream status to an error
pub fn error_for_status(provider: &str, status: StatusCode, body: String) -> RouterError {
    if is_rate_limit_error(status.as_u16(), &body) {
        return RouterError::RateLimited {
            provider: provider.to_string(),
            message: truncate(&body, 500).to_string(),
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return RouterError::Auth(format!("{} rejected the key: {}", provider, body));
    }

    RouterError::Upstream {
        status: status.as_u16(),
        body,
    }
}

/// Check if a response indicates a rate limit error
pub fn is_rate_limit_error(status: u16, body: &str) -> bool {
    // HTTP 429 Too Many Requests
    if status == 429 {
        return true;
    }

    // Some providers return 400 or 403 with rate limit messages
    let lower_body = body.to_lowercase();
    lower_body.contains("rate limit")
        || lower_body.contains("rate_limit")
        || lower_body.contains("too many requests")
        || lower_body.contains("quota exceeded")
        || lower_body.contains("resource_exhausted")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
