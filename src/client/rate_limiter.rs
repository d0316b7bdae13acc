//! Rate Limiting
//!
//! Token-bucket limiter per provider instance, configured from strings such
//! as `"60/min"` or `"5/1m30s"`.

use crate::client::cancel::CancelToken;
use crate::error::{Result, RouterError};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Parsed form of a rate limit string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    /// Time to refill one token
    pub period: Duration,

    /// Bucket size
    pub burst: NonZeroU32,
}

/// Parse `"<N>/<unit>"` into a refill period of `unit / N` and a burst of `N`.
///
/// `unit` is one of `s`, `sec`, `second`, `m`, `min`, `minute`, `h`, `hour`,
/// or a duration literal like `500ms` or `1m30s`.
pub fn parse_limit(spec: &str) -> Result<RateLimitSpec> {
    let invalid = |reason: &str| RouterError::InvalidRateLimit {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let (requests, unit) = spec
        .trim()
        .split_once('/')
        .ok_or_else(|| invalid("expected <requests>/<unit>"))?;
    if unit.contains('/') {
        return Err(invalid("expected <requests>/<unit>"));
    }

    let requests: u32 = requests
        .trim()
        .parse()
        .map_err(|_| invalid("requests must be a positive integer"))?;
    let burst = NonZeroU32::new(requests).ok_or_else(|| invalid("requests must be positive"))?;

    let window = match unit.trim() {
        "s" | "sec" | "second" => Duration::from_secs(1),
        "m" | "min" | "minute" => Duration::from_secs(60),
        "h" | "hour" => Duration::from_secs(3600),
        other => parse_duration_literal(other).ok_or_else(|| invalid("unknown unit"))?,
    };

    let period = window / requests;
    if period.is_zero() {
        return Err(invalid("window too small for the request count"));
    }

    Ok(RateLimitSpec { period, burst })
}

/// Parse a duration literal such as `"1m30s"`, `"500ms"` or `"1.5h"`
fn parse_duration_literal(s: &str) -> Option<Duration> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total_secs = 0f64;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let value: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        total_secs += value * scale;
        rest = &rest[unit_end..];
    }

    Duration::try_from_secs_f64(total_secs).ok()
}

/// Token-bucket limiter; unlimited when built without a spec
pub struct RateLimiter {
    spec: String,
    limiter: Option<DirectLimiter>,
}

impl RateLimiter {
    /// Build from an optional rate limit string; empty or absent means unlimited
    pub fn from_spec(spec: Option<&str>) -> Result<Self> {
        match spec.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Self::unlimited()),
            Some(spec) => {
                let parsed = parse_limit(spec)?;
                let quota = Quota::with_period(parsed.period)
                    .ok_or_else(|| RouterError::InvalidRateLimit {
                        spec: spec.to_string(),
                        reason: "zero refill period".to_string(),
                    })?
                    .allow_burst(parsed.burst);

                Ok(Self {
                    spec: spec.to_string(),
                    limiter: Some(GovernorRateLimiter::direct(quota)),
                })
            }
        }
    }

    /// A limiter that never blocks
    pub fn unlimited() -> Self {
        Self {
            spec: String::new(),
            limiter: None,
        }
    }

    /// The string this limiter was built from
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Wait for a token, failing with [`RouterError::Cancelled`] on cancellation
    pub async fn wait(&self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RouterError::Cancelled);
        }

        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RouterError::Cancelled),
            _ = limiter.until_ready() => Ok(()),
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("spec", &self.spec)
            .field("limited", &self.limiter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_units() {
        let spec = parse_limit("60/min").unwrap();
        assert_eq!(spec.period, Duration::from_secs(1));
        assert_eq!(spec.burst.get(), 60);

        let spec = parse_limit("2/s").unwrap();
        assert_eq!(spec.period, Duration::from_millis(500));

        let spec = parse_limit("10/hour").unwrap();
        assert_eq!(spec.period, Duration::from_secs(360));
    }

    #[test]
    fn test_parse_duration_literal_units() {
        let spec = parse_limit("3/1m30s").unwrap();
        assert_eq!(spec.period, Duration::from_secs(30));

        let spec = parse_limit("5/500ms").unwrap();
        assert_eq!(spec.period, Duration::from_millis(100));

        assert_eq!(
            parse_duration_literal("1.5h"),
            Some(Duration::from_secs(5400))
        );
        assert_eq!(parse_duration_literal("10"), None);
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["invalid", "60", "0/s", "-1/s", "x/s", "5/fortnight", "5/", "1/2/s"] {
            assert!(
                matches!(parse_limit(bad), Err(RouterError::InvalidRateLimit { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_burst_then_block() {
        let limiter = RateLimiter::from_spec(Some("60/min")).unwrap();

        for i in 0..60 {
            assert!(limiter.try_acquire(), "call {i} should pass within burst");
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_wait_resumes_after_refill() {
        let limiter = RateLimiter::from_spec(Some("2/200ms")).unwrap();
        let cancel = CancelToken::new();

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // One token refills every 100ms
        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(1), limiter.wait(&cancel))
            .await
            .expect("wait should finish once a token refills")
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_empty_spec_is_unlimited() {
        let limiter = RateLimiter::from_spec(Some("  ")).unwrap();
        assert_eq!(limiter.spec(), "");
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
    }

    #[tokio::test]
    async fn test_wait_cancelled() {
        let limiter = RateLimiter::from_spec(Some("1/h")).unwrap();
        let cancel = CancelToken::new();

        limiter.wait(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(matches!(err, RouterError::Cancelled));
    }

    #[tokio::test]
    async fn test_wait_fails_fast_when_already_cancelled() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancelToken::new();
        cancel.cancel();

        tokio_test::assert_err!(limiter.wait(&cancel).await);
    }
}
