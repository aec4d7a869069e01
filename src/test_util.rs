//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::audit::{AuditLogger, AuditQuery, AuditStore, FileFallbackSink, RetentionPolicy, RetryPolicy, SqliteAuditStore};
use crate::clock::ManualClock;
use crate::config::Config;
use crate::database::models::{AuditAction, AuditLogEntry};
use crate::database::{Database, SqliteCredentialStore};
use crate::security::password::Argon2Hasher;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Temporary database, audit log and manual clock wired together
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub store: Arc<SqliteCredentialStore>,
    pub audit_store: Arc<SqliteAuditStore>,
    pub audit: Arc<AuditLogger>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.database.path = dir.path().join("taskhub.db").to_str().unwrap().to_string();
        config.audit.fallback_path = dir.path().join("audit-fallback.jsonl").to_str().unwrap().to_string();
        config.security.jwt_secret = "unit-test-secret".to_string();
        config.security.hash_memory_kib = 4096;
        config.security.hash_iterations = 1;
        config.security.hash_parallelism = 1;

        let db = Database::open(&config.database).unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let audit_store = Arc::new(SqliteAuditStore::new(db.clone()));
        let audit = Arc::new(AuditLogger::new(
            audit_store.clone(),
            Arc::new(FileFallbackSink::new(&config.audit.fallback_path)),
            clock.clone(),
            RetryPolicy::default(),
            RetentionPolicy::default(),
        ));

        Self {
            store: Arc::new(SqliteCredentialStore::new(db.clone())),
            dir,
            config,
            db,
            audit_store,
            audit,
            clock,
        }
    }

    pub fn hasher(&self) -> Arc<Argon2Hasher> {
        Arc::new(Argon2Hasher::from_config(&self.config.security).unwrap())
    }

    /// Every audit entry, oldest first
    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        let mut entries = self.audit_store
            .query(&AuditQuery { limit: Some(10_000), ..Default::default() })
            .unwrap();
        entries.reverse();
        entries
    }

    pub fn audit_actions(&self) -> Vec<AuditAction> {
        self.audit_entries().into_iter().map(|e| e.action).collect()
    }
}
