//! Fixed-window request limits per route class and client.
//!
//! Every request first counts against a coarse global ceiling for the client,
//! then against the ceiling of its route class. A window opens on the first
//! request for a key and resets once its length has elapsed.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::config::{RateLimitConfig, RateRule};
use crate::database::models::{AuditAction, ClientMeta};
use crate::error::{AuthError, AuthResult};

/// Route groups that carry their own ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Global,
    Register,
    VerifyEmail,
    ResendVerification,
    Login,
    PasswordReset,
    Refresh,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Global => "global",
            RouteClass::Register => "register",
            RouteClass::VerifyEmail => "verify_email",
            RouteClass::ResendVerification => "resend_verification",
            RouteClass::Login => "login",
            RouteClass::PasswordReset => "password_reset",
            RouteClass::Refresh => "refresh",
        }
    }
}

/// Counter state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Shared counter storage
#[cfg_attr(test, mockall::automock)]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key`, opening a new window if the previous one has ended
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowCount;

    /// Current window for `key`, if one is open at `now`
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<WindowCount>;

    fn reset(&self, key: &str);

    /// Drop windows that ended before `now`; returns how many were removed
    fn prune(&self, now: DateTime<Utc>) -> usize;
}

/// In-process counter map
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, WindowCount>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowCount {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let entry = windows.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            window_start: now,
            window_end: now + window,
        });

        if now >= entry.window_end {
            *entry = WindowCount {
                count: 0,
                window_start: now,
                window_end: now + window,
            };
        }

        entry.count = entry.count.saturating_add(1);
        *entry
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<WindowCount> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get(key).copied().filter(|w| now < w.window_end)
    }

    fn reset(&self, key: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(key);
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let before = windows.len();
        windows.retain(|_, w| now < w.window_end);
        before - windows.len()
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        config: RateLimitConfig,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, config, audit, clock }
    }

    fn rule_for(&self, route: RouteClass) -> RateRule {
        match route {
            RouteClass::Global => self.config.global,
            RouteClass::Register => self.config.register,
            RouteClass::VerifyEmail => self.config.verify_email,
            RouteClass::ResendVerification => self.config.resend_verification,
            RouteClass::Login => self.config.login,
            RouteClass::PasswordReset => self.config.password_reset,
            RouteClass::Refresh => self.config.refresh,
        }
    }

    /// Count a request and reject it when a ceiling is exceeded
    pub fn check(&self, route: RouteClass, client_key: &str) -> AuthResult<()> {
        let now = self.clock.now();

        self.count(RouteClass::Global, client_key, now)?;
        if route != RouteClass::Global {
            self.count(route, client_key, now)?;
        }

        Ok(())
    }

    /// Boolean form of `check`
    pub fn allow(&self, route: RouteClass, client_key: &str) -> bool {
        self.check(route, client_key).is_ok()
    }

    /// Forget the counter for one route and client
    pub fn reset(&self, route: RouteClass, client_key: &str) {
        self.store.reset(&Self::key(route, client_key));
    }

    /// Drop windows that have ended
    pub fn prune(&self) -> usize {
        self.store.prune(self.clock.now())
    }

    fn key(route: RouteClass, client_key: &str) -> String {
        format!("{}:{}", route.as_str(), client_key)
    }

    fn count(&self, route: RouteClass, client_key: &str, now: DateTime<Utc>) -> AuthResult<()> {
        let rule = self.rule_for(route);
        let window = Duration::seconds(rule.window_secs as i64);
        let state = self.store.increment(&Self::key(route, client_key), window, now);

        if state.count <= rule.max_requests {
            debug!("Rate limit {} for {}: {}/{}", route.as_str(), client_key, state.count, rule.max_requests);
            return Ok(());
        }

        // Round up so a client never retries a fraction of a second too early
        let remaining_ms = (state.window_end - now).num_milliseconds().max(0);
        let retry_after_secs = ((remaining_ms + 999) / 1000).max(1) as u64;

        warn!("Rate limit exceeded on {} for {} ({} requests)", route.as_str(), client_key, state.count);
        self.audit.log(
            AuditRecord::new(AuditAction::RateLimitExceeded)
                .details(json!({
                    "route": route.as_str(),
                    "limit": rule.max_requests,
                    "windowSecs": rule.window_secs,
                    "retryAfterSecs": retry_after_secs,
                }))
                .client(&ClientMeta::new(Some(client_key), None)),
        );

        Err(AuthError::RateLimited { retry_after_secs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::fallback::MockFallbackSink;
    use crate::audit::{MockAuditStore, RetentionPolicy, RetryPolicy};
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::database::models::Severity;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn limiter_with(store: MockAuditStore, clock: Arc<ManualClock>, config: RateLimitConfig) -> RateLimiter {
        let audit = Arc::new(AuditLogger::new(
            Arc::new(store),
            Arc::new(MockFallbackSink::new()),
            clock.clone(),
            RetryPolicy::default(),
            RetentionPolicy::default(),
        ));
        RateLimiter::new(Arc::new(InMemoryRateLimitStore::new()), config, audit, clock)
    }

    #[test]
    fn test_register_ceiling_and_rollover() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mut audit_store = MockAuditStore::new();
        audit_store.expect_save()
            .withf(|e| e.action == AuditAction::RateLimitExceeded
                && e.severity == Severity::High
                && e.ip_address.as_deref() == Some("1.2.3.4")
                && e.details["route"] == "register")
            .times(1)
            .returning(|_| Ok(()));

        let limiter = limiter_with(audit_store, clock.clone(), Config::default().rate_limits);

        for _ in 0..5 {
            limiter.check(RouteClass::Register, "1.2.3.4").unwrap();
        }

        match limiter.check(RouteClass::Register, "1.2.3.4") {
            Err(AuthError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 900),
            other => panic!("expected rate limit, got {:?}", other),
        }

        // Other clients are unaffected
        assert!(limiter.allow(RouteClass::Register, "5.6.7.8"));

        clock.advance(Duration::minutes(15));
        assert!(limiter.check(RouteClass::Register, "1.2.3.4").is_ok());
    }

    #[test]
    fn test_global_ceiling_applies_first() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mut audit_store = MockAuditStore::new();
        audit_store.expect_save()
            .withf(|e| e.details["route"] == "global")
            .times(1)
            .returning(|_| Ok(()));

        let mut config = Config::default().rate_limits;
        config.global = RateRule::new(2, 60);
        let limiter = limiter_with(audit_store, clock, config);

        assert!(limiter.allow(RouteClass::Login, "9.9.9.9"));
        assert!(limiter.allow(RouteClass::Refresh, "9.9.9.9"));
        assert!(!limiter.allow(RouteClass::Login, "9.9.9.9"));
    }

    #[test]
    fn test_retry_after_counts_down() {
        let clock = Arc::new(ManualClock::new(t0()));
        let mut audit_store = MockAuditStore::new();
        audit_store.expect_save().returning(|_| Ok(()));

        let mut config = Config::default().rate_limits;
        config.resend_verification = RateRule::new(1, 3600);
        let limiter = limiter_with(audit_store, clock.clone(), config);

        limiter.check(RouteClass::ResendVerification, "ip").unwrap();
        clock.advance(Duration::seconds(3599) + Duration::milliseconds(500));

        match limiter.check(RouteClass::ResendVerification, "ip") {
            Err(AuthError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 1),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_in_memory_store_windows() {
        let store = InMemoryRateLimitStore::new();
        let window = Duration::minutes(1);

        assert_eq!(store.increment("k", window, t0()).count, 1);
        assert_eq!(store.increment("k", window, t0() + Duration::seconds(59)).count, 2);
        assert_eq!(store.get("k", t0() + Duration::seconds(30)).map(|w| w.count), Some(2));
        assert!(store.get("k", t0() + Duration::seconds(60)).is_none());

        let rolled = store.increment("k", window, t0() + Duration::seconds(60));
        assert_eq!(rolled.count, 1);
        assert_eq!(rolled.window_start, t0() + Duration::seconds(60));

        store.increment("other", window, t0());
        assert_eq!(store.prune(t0() + Duration::seconds(61)), 1);
        store.reset("k");
        assert!(store.get("k", t0() + Duration::seconds(61)).is_none());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryRateLimitStore::new());
        let handles: Vec<_> = (0..8).map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    store.increment("shared", Duration::hours(1), t0());
                }
            })
        }).collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared", t0()).map(|w| w.count), Some(800));
    }
}
