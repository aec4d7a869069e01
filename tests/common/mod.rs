#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use taskhub_auth::api::{ApiResponse, RequestContext};
use taskhub_auth::audit::AuditQuery;
use taskhub_auth::clock::ManualClock;
use taskhub_auth::config::Config;
use taskhub_auth::database::models::{AuditAction, AuditLogEntry};
use taskhub_auth::email::{DeliveryOutcome, EmailMessage, EmailSender};
use taskhub_auth::App;

/// Mailer that keeps every message it is handed
#[derive(Default)]
pub struct RecordingMailer {
    messages: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Token embedded in the most recent message to `to`
    pub fn last_token_for(&self, to: &str) -> Option<String> {
        let messages = self.messages.lock().unwrap();
        let message = messages.iter().rev().find(|m| m.to == to)?;
        let start = message.text_body.find("token=")? + "token=".len();
        message.text_body[start..].split_whitespace().next().map(str::to_string)
    }
}

impl EmailSender for RecordingMailer {
    fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
        self.messages.lock().unwrap().push(message.clone());
        DeliveryOutcome::Accepted
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub app: App,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("taskhub.db").to_str().unwrap().to_string();
    config.audit.fallback_path = dir.path().join("audit-fallback.jsonl").to_str().unwrap().to_string();
    config.security.jwt_secret = "integration-test-secret".to_string();
    config.security.hash_memory_kib = 4096;
    config.security.hash_iterations = 1;
    config.security.hash_parallelism = 1;
    config
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        adjust(&mut config);

        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let mailer = Arc::new(RecordingMailer::default());
        let app = App::build(config, clock.clone(), mailer.clone()).unwrap();

        Self { dir, app, clock, mailer }
    }

    pub fn post(&self, path: &str, body: serde_json::Value, ctx: &RequestContext) -> ApiResponse {
        self.app.api.handle("POST", path, &body.to_string(), ctx)
    }

    pub fn get(&self, path: &str, ctx: &RequestContext) -> ApiResponse {
        self.app.api.handle("GET", path, "", ctx)
    }

    pub fn register(&self, email: &str, ctx: &RequestContext) -> ApiResponse {
        self.post("/auth/register", serde_json::json!({
            "email": email,
            "password": "Str0ng!Pass",
            "confirmPassword": "Str0ng!Pass",
            "firstName": "Alice",
            "lastName": "Smith",
        }), ctx)
    }

    pub fn login(&self, email: &str, ctx: &RequestContext) -> ApiResponse {
        self.post("/auth/login", serde_json::json!({ "email": email, "password": "Str0ng!Pass" }), ctx)
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        let mut entries = self.app.audit
            .query(&AuditQuery { limit: Some(10_000), ..Default::default() })
            .unwrap();
        entries.reverse();
        entries
    }

    pub fn audit_actions(&self) -> Vec<AuditAction> {
        self.audit_entries().into_iter().map(|e| e.action).collect()
    }
}

pub fn client(ip: &str) -> RequestContext {
    RequestContext::new(Some(ip), Some("integration-test"))
}

pub fn str_field(response: &ApiResponse, name: &str) -> String {
    response.data_field(name)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {:?}", name, response.body))
        .to_string()
}
