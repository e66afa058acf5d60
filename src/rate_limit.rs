/// Rate Limiting System
///
/// Two layers:
/// - `RateLimiter`: fixed-window counters keyed by `{action}:{identifier}`,
///   used by the auth flows for their per-IP budgets.
/// - `RequestThrottle`: a governor quota per client IP applied to every request.
use crate::{
    api::middleware::ClientInfo,
    config::{RateLimitConfig, RateRule},
    context::AppContext,
    error::GuardError,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::Mutex,
};

/// Outcome of a single counter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Time until the window resets, floored at zero
    pub fn retry_after(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.reset_at - now).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window counters shared by every request handler
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `{action}:{identifier}` against `rule`
    pub fn check(&self, action: &str, identifier: &str, rule: &RateRule) -> RateLimitDecision {
        self.check_at(action, identifier, rule, Utc::now())
    }

    pub fn check_at(
        &self,
        action: &str,
        identifier: &str,
        rule: &RateRule,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let key = format!("{}:{}", action, identifier);

        // Reset and increment under one lock so concurrent callers never share a stale window
        let mut counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = counters.entry(key).or_insert(WindowCounter {
            count: 0,
            reset_at: now + rule.window(),
        });

        if now > counter.reset_at {
            *counter = WindowCounter {
                count: 0,
                reset_at: now + rule.window(),
            };
        }

        counter.count = counter.count.saturating_add(1);

        RateLimitDecision {
            allowed: counter.count <= rule.max_requests,
            remaining: rule.max_requests.saturating_sub(counter.count),
            reset_at: counter.reset_at,
        }
    }

    /// Drop counters whose window has passed
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = counters.len();
        counters.retain(|_, counter| now <= counter.reset_at);
        before - counters.len()
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.counters.lock().unwrap().len()
    }
}

/// Per-IP request throttle backed by governor
pub struct RequestThrottle {
    enabled: bool,
    limiter: DefaultKeyedRateLimiter<String>,
}

impl RequestThrottle {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            enabled: config.enabled,
            limiter: GovernorLimiter::keyed(Quota::per_minute(per_minute)),
        }
    }

    pub fn check(&self, client_ip: &str) -> Result<(), GuardError> {
        if !self.enabled {
            return Ok(());
        }

        self.limiter
            .check_key(&client_ip.to_string())
            .map_err(|_| GuardError::RateLimitExceeded {
                message: "Too many requests. Please slow down.".to_string(),
                retry_after: std::time::Duration::from_secs(1),
            })
    }

    /// Forget idle clients
    pub fn shrink(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = ClientInfo::client_ip(
        request.headers(),
        request.extensions(),
        ctx.config.security.trust_proxy_headers,
    );

    match ctx.throttle.check(&client_ip) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(client_ip = %client_ip, "Global request throttle engaged");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_denies_from_the_call_after_budget() {
        let limiter = RateLimiter::new();
        let rule = RateRule::new(3, 60);
        let now = Utc::now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("login", "10.0.0.1", &rule, now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check_at("login", "10.0.0.1", &rule, now);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);

        // Still denied later in the same window
        let decision = limiter.check_at("login", "10.0.0.1", &rule, now + Duration::seconds(30));
        assert!(!decision.allowed);
    }

    #[test]
    fn test_window_resets_after_reset_time() {
        let limiter = RateLimiter::new();
        let rule = RateRule::new(1, 60);
        let now = Utc::now();

        let first = limiter.check_at("signup", "10.0.0.2", &rule, now);
        assert!(first.allowed);
        assert!(!limiter.check_at("signup", "10.0.0.2", &rule, now).allowed);

        // Exactly at reset time the old window still applies
        assert!(!limiter.check_at("signup", "10.0.0.2", &rule, first.reset_at).allowed);

        let later = first.reset_at + Duration::milliseconds(1);
        let fresh = limiter.check_at("signup", "10.0.0.2", &rule, later);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 0);
        assert_eq!(fresh.reset_at, later + Duration::seconds(60));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let rule = RateRule::new(1, 60);
        let now = Utc::now();

        assert!(limiter.check_at("login", "a", &rule, now).allowed);
        assert!(limiter.check_at("login", "b", &rule, now).allowed);
        assert!(limiter.check_at("refresh", "a", &rule, now).allowed);
        assert!(!limiter.check_at("login", "a", &rule, now).allowed);
    }

    #[test]
    fn test_cleanup_drops_elapsed_windows() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        limiter.check_at("login", "a", &RateRule::new(5, 60), now);
        limiter.check_at("login", "b", &RateRule::new(5, 3600), now);

        assert_eq!(limiter.cleanup_at(now + Duration::seconds(120)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_checks_never_overshoot() {
        let limiter = Arc::new(RateLimiter::new());
        let rule = RateRule::new(50, 60);
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check_at("login", "shared", &rule, now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_retry_after() {
        let now = Utc::now();
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at: now + Duration::seconds(90),
        };
        assert_eq!(decision.retry_after(now).as_secs(), 90);
        assert_eq!(decision.retry_after(now + Duration::seconds(100)).as_secs(), 0);
    }

    #[test]
    fn test_throttle_burst_limit() {
        let throttle = RequestThrottle::new(&RateLimitConfig {
            enabled: true,
            requests_per_minute: 5,
        });

        for _ in 0..5 {
            assert!(throttle.check("10.0.0.1").is_ok());
        }
        assert!(throttle.check("10.0.0.1").is_err());
        assert!(throttle.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_disabled_throttle_allows_everything() {
        let throttle = RequestThrottle::new(&RateLimitConfig {
            enabled: false,
            requests_per_minute: 1,
        });

        for _ in 0..10 {
            assert!(throttle.check("10.0.0.1").is_ok());
        }
    }
}
