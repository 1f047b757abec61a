//! Fixed window rate limiting per client IP.

use crate::config::RateLimitConfig;
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use moka::sync::Cache;
use parking_lot::Mutex;
use shared::http::PeerAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MAX_TRACKED_CLIENTS: u64 = 10_000;

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

struct Window {
    started: Instant,
    count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

impl Decision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let reset_at = SystemTime::now() + self.reset_after;
        let reset_unix = reset_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(RESET_HEADER, HeaderValue::from(reset_unix));
        if !self.allowed {
            headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after_secs()));
        }
    }

    pub fn retry_after_secs(&self) -> u64 {
        // Round up so clients never retry inside the same window
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    // Clients idle for a full window are evicted; their next request opens a new window anyway
    windows: Cache<String, Arc<Mutex<Window>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let windows = Cache::builder()
            .max_capacity(MAX_TRACKED_CLIENTS)
            .time_to_idle(window)
            .build();

        RateLimiter {
            limit,
            window,
            windows,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| {
            RateLimiter::new(config.requests, Duration::from_secs(config.window_secs))
        })
    }

    pub fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Decision {
        let entry = self.windows.get_with(client.to_string(), || {
            Arc::new(Mutex::new(Window {
                started: now,
                count: 0,
            }))
        });

        let mut window = entry.lock();
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        window.count = window.count.saturating_add(1);

        Decision {
            allowed: window.count <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_after: self
                .window
                .saturating_sub(now.duration_since(window.started)),
        }
    }
}

/// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<&PeerAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match peer {
        Some(PeerAddr(addr)) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
