mod common;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use common::{client, TestApp};
use taskhub_auth::audit::{
    AuditLogger, AuditQuery, AuditRecord, AuditStore, FileFallbackSink, RetentionPolicy, RetryPolicy,
    SecuritySummary, WriteOutcome,
};
use taskhub_auth::clock::{Clock, ManualClock};
use taskhub_auth::database::models::{AuditAction, AuditLogEntry};
use taskhub_auth::database::CredentialStore;

#[test]
fn test_register_rate_limit_rolls_over() {
    let app = TestApp::new();
    let ctx = client("198.51.100.1");
    let ceiling = app.app.config.rate_limits.register.max_requests;

    for i in 0..ceiling {
        let response = app.register(&format!("user{}@example.com", i), &ctx);
        assert_eq!(response.status, 201);
    }

    let limited = app.register("one-too-many@example.com", &ctx);
    assert_eq!(limited.status, 429);
    assert!(!limited.is_success());
    assert!(app.audit_actions().contains(&AuditAction::RateLimitExceeded));

    app.clock.advance(Duration::seconds(app.app.config.rate_limits.register.window_secs as i64));
    assert_eq!(app.register("one-too-many@example.com", &ctx).status, 201);
}

#[test]
fn test_limits_are_per_client() {
    let app = TestApp::with_config(|c| c.rate_limits.verify_email.max_requests = 2);
    let body = json!({ "token": "nope" });

    let a = client("198.51.100.2");
    let b = client("198.51.100.3");
    assert_eq!(app.post("/auth/verify-email", body.clone(), &a).status, 400);
    assert_eq!(app.post("/auth/verify-email", body.clone(), &a).status, 400);
    assert_eq!(app.post("/auth/verify-email", body.clone(), &a).status, 429);
    assert_eq!(app.post("/auth/verify-email", body, &b).status, 400);
}

struct FailingAuditStore {
    calls: AtomicUsize,
}

impl AuditStore for FailingAuditStore {
    fn save(&self, _entry: &AuditLogEntry) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("database is locked")
    }

    fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }

    fn user_security_summary(&self, user_id: &str, since: DateTime<Utc>) -> Result<SecuritySummary> {
        Ok(SecuritySummary { user_id: user_id.to_string(), since: Some(since), ..Default::default() })
    }

    fn prune(&self, _policy: &RetentionPolicy, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

#[test]
fn test_audit_failure_lands_in_fallback_file() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_path = dir.path().join("fallback.jsonl");
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let store = Arc::new(FailingAuditStore { calls: AtomicUsize::new(0) });
    let fallback = Arc::new(FileFallbackSink::new(&fallback_path));

    let logger = AuditLogger::new(
        store.clone(),
        fallback.clone(),
        clock.clone(),
        RetryPolicy::default(),
        RetentionPolicy::default(),
    );

    let outcome = logger.log(
        AuditRecord::new(AuditAction::LoginFailed)
            .details(json!({ "reason": "bad_password" })),
    );

    assert_eq!(outcome, WriteOutcome::Fallback);
    assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        clock.sleeps(),
        vec![StdDuration::from_secs(1), StdDuration::from_secs(2), StdDuration::from_secs(3)]
    );

    let entries = fallback.read_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::LoginFailed);
    assert_eq!(entries[0].details["reason"], "bad_password");
}

#[test]
fn test_audit_summary_counts_failed_logins() {
    let app = TestApp::new();
    let ctx = client("198.51.100.4");
    app.register("alice@example.com", &ctx);
    let user_id = app.app.store
        .find_user_by_email("alice@example.com")
        .unwrap()
        .unwrap()
        .id;

    for _ in 0..2 {
        app.post("/auth/login", json!({ "email": "alice@example.com", "password": "Wr0ng!Pass" }), &ctx);
    }
    app.login("alice@example.com", &ctx);

    let summary = app.app.audit.user_security_summary(&user_id, 30).unwrap();
    assert_eq!(summary.failed_logins, 2);
    assert_eq!(summary.distinct_ips, 1);
    assert_eq!(summary.last_login_at, Some(app.clock.now()));
}
