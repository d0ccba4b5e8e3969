//! Per-client request rate limiting.
//!
//! Each [`RateLimiter`] owns a registry of token buckets keyed by client identity (an IP string).
//! A bucket holds up to `burst` tokens, refills continuously at one token per `refill_every`, and
//! each admitted request spends one token. Buckets are created lazily on first sight of a client
//! and swept passively: whenever an admission check finds that more than `cleanup_interval` has
//! passed since the last sweep, buckets idle for longer than that interval are dropped.
//!
//! Independent limiters guard different endpoint classes (see [`Limiters`]); they are plain
//! values injected through router state, so tests build isolated instances with a
//! [`ManualClock`](crate::clock::ManualClock).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RateLimitRule};
use crate::errors::Error;

/// All rate limiters used by the router. `None` means the class is not limited.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Login and OAuth callback
    pub auth: Option<Arc<RateLimiter>>,
    /// Reservation API
    pub api: Option<Arc<RateLimiter>>,
}

impl Limiters {
    /// Creates all limiters from configuration.
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        if !config.enabled {
            tracing::info!("Rate limiting disabled");
            return Self::default();
        }

        Self {
            auth: Some(Arc::new(RateLimiter::new("auth", config.auth.clone(), config, clock.clone()))),
            api: Some(Arc::new(RateLimiter::new("api", config.api.clone(), config, clock))),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug)]
struct Registry {
    buckets: HashMap<String, Bucket>,
    last_cleanup: DateTime<Utc>,
}

/// Token-bucket limiter for one endpoint class.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    refill_rate: f64,
    burst: f64,
    trust_proxy: bool,
    cleanup_interval: chrono::Duration,
    retry_after: Duration,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

impl RateLimiter {
    pub fn new(name: &'static str, rule: RateLimitRule, config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name,
            refill_rate: rule.refill_rate(),
            burst: f64::from(rule.burst),
            trust_proxy: rule.trust_proxy,
            cleanup_interval: chrono::Duration::from_std(config.cleanup_interval).unwrap_or(chrono::Duration::MAX),
            retry_after: config.retry_after,
            clock,
            registry: Mutex::new(Registry {
                buckets: HashMap::new(),
                last_cleanup: now,
            }),
        }
    }

    /// Spend one token from `identity`'s bucket. Returns false when the bucket is empty.
    pub fn admit(&self, identity: &str) -> bool {
        let now = self.clock.now();
        let mut registry = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now - registry.last_cleanup > self.cleanup_interval {
            let interval = self.cleanup_interval;
            let before = registry.buckets.len();
            registry.buckets.retain(|_, bucket| now - bucket.last_seen <= interval);
            registry.last_cleanup = now;
            tracing::debug!(
                limiter = self.name,
                evicted = before - registry.buckets.len(),
                remaining = registry.buckets.len(),
                "Swept idle rate limit buckets"
            );
        }

        let bucket = registry.buckets.entry(identity.to_string()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = (now - bucket.last_refill).num_microseconds().unwrap_or(i64::MAX).max(0) as f64 / 1_000_000.0;
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.burst);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).buckets.len()
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// Client identity for a request.
    ///
    /// With `trust_proxy`, the first `X-Forwarded-For` entry wins, then `X-Real-IP`. Otherwise, or
    /// when neither header is usable, the socket peer address is used.
    pub fn client_identity(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_string();
            }

            let real_ip = headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = real_ip {
                return ip.to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
    }
}

/// Axum middleware enforcing `limiter` ahead of the wrapped routes.
///
/// ```ignore
/// router.route_layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
/// ```
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);
    let identity = limiter.client_identity(request.headers(), peer);

    if !limiter.admit(&identity) {
        tracing::warn!(
            limiter = limiter.name,
            client = %identity,
            method = %request.method(),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        return Error::TooManyRequests {
            retry_after: limiter.retry_after(),
        }
        .into_response();
    }

    next.run(request).await
}
