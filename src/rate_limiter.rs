use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::ServiceError;

/// Replaceable rate-limit capability: call sites only see check-and-increment,
/// so the in-memory limiter can be swapped for a distributed one without
/// touching them.
pub trait RateLimiter: Send + Sync {
    /// Records a hit for `key` and reports whether it is still within budget.
    fn check_and_increment(&self, key: &str) -> bool;
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 30,
            window: Duration::from_secs(60),
        }
    }
}

struct WindowState {
    started: Instant,
    count: u32,
}

/// Process-local fixed-window limiter keyed by client IP. Best-effort by
/// design: counters reset on process restart.
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, WindowState>,
}

const CLEANUP_THRESHOLD: usize = 10_000;

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn cleanup_expired(&self) {
        let window = self.config.window;
        self.windows.retain(|_, state| state.started.elapsed() < window);
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_increment(&self, key: &str) -> bool {
        if self.windows.len() > CLEANUP_THRESHOLD {
            self.cleanup_expired();
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(WindowState {
            started: Instant::now(),
            count: 0,
        });

        if entry.started.elapsed() >= self.config.window {
            entry.started = Instant::now();
            entry.count = 0;
        }

        if entry.count >= self.config.requests_per_window {
            return false;
        }
        entry.count += 1;
        true
    }
}

/// Client key: first hop of `x-forwarded-for` when present (the service runs
/// behind a proxy in production), otherwise the socket peer address.
fn client_key(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware applying the injected limiter per client IP.
pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<Arc<dyn RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(request.headers(), request.extensions());
    if !limiter.check_and_increment(&key) {
        warn!(client = %key, "rate limit exceeded");
        return ServiceError::RateLimitExceeded.into_response();
    }
    next.run(request).await
}
