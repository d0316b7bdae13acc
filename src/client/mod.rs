//! Client Module
//!
//! HTTP transport, rate limiting, retry and cancellation.

pub mod cancel;
pub mod http;
pub mod rate_limiter;
pub mod retry;

pub use cancel::CancelToken;
pub use http::{HttpClient, SseStream};
pub use rate_limiter::{parse_limit, RateLimitSpec, RateLimiter};
pub use retry::{with_retry, LinearBackoff, RetryPolicy};
