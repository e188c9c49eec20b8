//! Rate Limiting Middleware for Quire
//!
//! Fixed-window request counting per client address:
//! - Counter starts at zero with the window ending `window_ms` from the first request
//! - A request after the window end resets the counter and opens a new window
//! - Requests beyond `max_requests` in a window get 429 with `Retry-After`
//!
//! A burst of up to twice the limit can straddle a window boundary. The
//! counter map is swept periodically and capped at `max_tracked_clients`.

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::core::{Clock, system_clock};

/// Rate limit check result with metadata for response headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the current window ends
    pub reset_in: Duration,
}

impl RateLimitResult {
    /// `Retry-After` value in whole seconds, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_in.as_millis().div_ceil(1000) as u64
    }
}

/// Request counter for one client address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u64,
    pub window_reset_at: u64,
}

/// Rate limiter state
#[derive(Clone)]
pub struct RateLimiter {
    /// Counters keyed by client address
    counters: Arc<RwLock<HashMap<String, WindowCounter>>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `client` and decide whether to admit it
    pub fn check(&self, client: &str) -> RateLimitResult {
        let now = self.clock.now_ms();
        let window = self.config.window_ms;
        let limit = self.config.max_requests;

        let mut counters = self.counters.write();

        if !counters.contains_key(client) && counters.len() >= self.config.max_tracked_clients {
            Self::make_room(&mut counters, now, self.config.max_tracked_clients);
        }

        let counter = counters
            .entry(client.to_string())
            .or_insert_with(|| WindowCounter {
                count: 0,
                window_reset_at: now + window,
            });

        if now > counter.window_reset_at {
            counter.count = 0;
            counter.window_reset_at = now + window;
        }

        counter.count += 1;

        RateLimitResult {
            allowed: counter.count <= limit,
            limit,
            remaining: limit.saturating_sub(counter.count),
            reset_in: Duration::from_millis(counter.window_reset_at.saturating_sub(now)),
        }
    }

    /// Current counter for `client`, if tracked
    pub fn counter(&self, client: &str) -> Option<WindowCounter> {
        self.counters.read().get(client).cloned()
    }

    pub fn tracked_clients(&self) -> usize {
        self.counters.read().len()
    }

    /// Drop counters whose window has already ended
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, counter| counter.window_reset_at >= now);
        before - counters.len()
    }

    /// Start background cleanup task
    pub fn start_cleanup(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!("Starting rate limiter cleanup task (interval={:?})", interval);

        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let removed = limiter.cleanup();
                if removed > 0 {
                    debug!("Removed {} expired rate limit counters", removed);
                }
            }
        })
    }

    /// Free a slot: drop expired counters, else evict the oldest window
    fn make_room(counters: &mut HashMap<String, WindowCounter>, now: u64, max: usize) {
        counters.retain(|_, counter| counter.window_reset_at >= now);
        if counters.len() < max {
            return;
        }

        let oldest = counters
            .iter()
            .min_by_key(|(_, counter)| counter.window_reset_at)
            .map(|(client, _)| client.clone());

        if let Some(client) = oldest {
            debug!("Rate limiter full, evicting counter for {}", client);
            counters.remove(&client);
        }
    }
}

/// Rejection returned by the middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitError {
    /// Seconds until the window resets
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": "Too many requests",
            "code": "rate_limit_exceeded",
        }));

        let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from(self.retry_after),
        );
        response
    }
}

/// Client address: the socket peer, or proxy headers when they are trusted
fn client_address(request: &axum::extract::Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(address) = proxy_address(request.headers()) {
            return address;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn proxy_address(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(forwarded.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Rate limit middleware
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !limiter.config.enabled {
        return Ok(next.run(request).await);
    }

    let client = client_address(&request, limiter.config.trust_proxy_headers);
    let result = limiter.check(&client);

    if !result.allowed {
        warn!(
            "Rate limit exceeded for {}: {} requests per {}ms",
            client, result.limit, limiter.config.window_ms
        );
        return Err(RateLimitError {
            retry_after: result.retry_after_secs(),
        });
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(&mut response, &result);

    Ok(response)
}

/// Add rate limit headers to response
///
/// - X-RateLimit-Limit: Requests allowed per window
/// - X-RateLimit-Remaining: Remaining requests in current window
/// - X-RateLimit-Reset: Seconds until the window resets
fn add_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(result.limit),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(result.remaining),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-reset"),
        HeaderValue::from(result.retry_after_secs()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;

    fn limiter(max_requests: u64, window_ms: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = RateLimitConfig {
            enabled: true,
            max_requests,
            window_ms,
            ..Default::default()
        };
        (RateLimiter::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_fixed_window_admits_limit_then_rejects() {
        let (limiter, clock) = limiter(60, 60_000);

        for i in 0..60 {
            let result = limiter.check("10.0.0.1");
            assert!(result.allowed, "request {} should be admitted", i + 1);
            clock.advance(Duration::from_millis(100));
        }

        let rejected = limiter.check("10.0.0.1");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.retry_after_secs() <= 60);
        assert!(rejected.retry_after_secs() >= 1);
    }

    #[test]
    fn test_new_window_resets_counter() {
        let (limiter, clock) = limiter(60, 60_000);

        for _ in 0..61 {
            limiter.check("10.0.0.1");
        }
        assert!(!limiter.check("10.0.0.1").allowed);

        clock.advance(Duration::from_millis(60_001));
        let result = limiter.check("10.0.0.1");
        assert!(result.allowed);
        assert_eq!(limiter.counter("10.0.0.1").unwrap().count, 1);
    }

    #[test]
    fn test_window_end_is_inclusive() {
        let (limiter, clock) = limiter(1, 1_000);

        assert!(limiter.check("a").allowed);
        clock.advance(Duration::from_millis(1_000));
        // now == window_reset_at: still the same window
        assert!(!limiter.check("a").allowed);
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _) = limiter(2, 1_000);

        assert!(limiter.check("a").allowed);
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_cleanup_drops_expired_windows() {
        let (limiter, clock) = limiter(10, 1_000);
        limiter.check("a");
        clock.advance(Duration::from_millis(500));
        limiter.check("b");

        clock.advance(Duration::from_millis(600));
        assert_eq!(limiter.cleanup(), 1);
        assert!(limiter.counter("a").is_none());
        assert!(limiter.counter("b").is_some());
    }

    #[test]
    fn test_tracked_clients_are_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(
            RateLimitConfig {
                enabled: true,
                max_requests: 10,
                window_ms: 1_000,
                max_tracked_clients: 2,
                ..Default::default()
            },
            clock.clone(),
        );

        limiter.check("a");
        clock.advance(Duration::from_millis(10));
        limiter.check("b");
        clock.advance(Duration::from_millis(10));
        limiter.check("c");

        assert_eq!(limiter.tracked_clients(), 2);
        assert!(limiter.counter("a").is_none());
        assert!(limiter.counter("c").is_some());
    }

    #[test]
    fn test_rejection_response() {
        let response = RateLimitError { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
    }

    fn request_from(peer: &str, forwarded_for: &str) -> axum::extract::Request {
        let mut request = axum::extract::Request::builder()
            .uri("/health")
            .header("x-forwarded-for", forwarded_for)
            .body(axum::body::Body::empty())
            .unwrap();
        let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_proxy_headers_ignored_unless_trusted() {
        let request = request_from("192.0.2.10", "203.0.113.99");

        assert_eq!(client_address(&request, false), "192.0.2.10");
        assert_eq!(client_address(&request, true), "203.0.113.99");
    }

    #[test]
    fn test_spoofed_forwarded_for_shares_peer_counter() {
        let (limiter, _) = limiter(2, 60_000);

        for spoofed in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            let request = request_from("192.0.2.10", spoofed);
            limiter.check(&client_address(&request, limiter.config().trust_proxy_headers));
        }

        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.counter("192.0.2.10").unwrap().count, 3);
        assert!(!limiter.check("192.0.2.10").allowed);
    }
}
