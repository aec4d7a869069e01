use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::database::models::{AuditAction, AuditLogEntry, ClientMeta, Severity};

pub mod fallback;
pub mod repository;

pub use fallback::{FallbackSink, FileFallbackSink};
pub use repository::SqliteAuditStore;

/// Persistent backend for audit entries
#[cfg_attr(test, mockall::automock)]
pub trait AuditStore: Send + Sync {
    fn save(&self, entry: &AuditLogEntry) -> Result<()>;

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>>;

    fn user_security_summary(&self, user_id: &str, since: DateTime<Utc>) -> Result<SecuritySummary>;

    /// Delete entries older than their severity's retention; returns the number removed
    fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize>;
}

/// An event to be recorded
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Option<Severity>,
}

impl AuditRecord {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            details: Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
            severity: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn client(mut self, meta: &ClientMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Filters for reading the audit log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    /// Only entries at or above this severity
    pub min_severity: Option<Severity>,
    pub ip_address: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Aggregate security view of one user
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecuritySummary {
    pub user_id: String,
    pub since: Option<DateTime<Utc>>,
    pub total_events: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub failed_logins: u64,
    pub distinct_ips: u64,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// How long entries of each severity are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub low_days: i64,
    pub medium_days: i64,
    pub high_days: i64,
    pub critical_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            low_days: 30,
            medium_days: 90,
            high_days: 365,
            critical_days: 730,
        }
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            low_days: config.retention_low_days,
            medium_days: config.retention_medium_days,
            high_days: config.retention_high_days,
            critical_days: config.retention_critical_days,
        }
    }

    pub fn days_for(&self, severity: Severity) -> i64 {
        match severity {
            Severity::Low => self.low_days,
            Severity::Medium => self.medium_days,
            Severity::High => self.high_days,
            Severity::Critical => self.critical_days,
        }
    }

    /// Entries of `severity` older than the returned instant are eligible for deletion
    pub fn cutoff(&self, severity: Severity, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days_for(severity))
    }
}

/// Linear backoff between store retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed write
    pub max_retries: u32,
    pub base_delay: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: std::time::Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            max_retries: config.retry_attempts,
            base_delay: std::time::Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        self.base_delay * retry
    }
}

/// Where an audit entry ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored { attempts: u32 },
    Fallback,
    LoggedOnly,
}

/// Audit logger.
///
/// Writing never fails from the caller's point of view: the entry goes to the
/// store, then to the fallback sink, and as a last resort to the process log.
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    fallback: Arc<dyn FallbackSink>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    retention: RetentionPolicy,
}

impl AuditLogger {
    pub fn new(
        store: Arc<dyn AuditStore>,
        fallback: Arc<dyn FallbackSink>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        retention: RetentionPolicy,
    ) -> Self {
        Self { store, fallback, clock, retry, retention }
    }

    /// Record an audit event
    pub fn log(&self, record: AuditRecord) -> WriteOutcome {
        let entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            action: record.action,
            severity: record.severity.unwrap_or_else(|| record.action.default_severity()),
            user_id: record.user_id,
            details: record.details,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
            timestamp: self.clock.now(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.store.save(&entry) {
                Ok(()) => {
                    debug!("Audit event logged: {} - {}", entry.id, entry.action.as_str());
                    return WriteOutcome::Stored { attempts };
                }
                Err(e) => {
                    warn!("Audit store write {} failed for {}: {:#}", attempts, entry.id, e);
                }
            }

            if attempts > self.retry.max_retries {
                break;
            }
            self.clock.sleep(self.retry.delay_for(attempts));
        }

        match self.fallback.write(&entry) {
            Ok(()) => {
                warn!("Audit event {} written to fallback sink", entry.id);
                WriteOutcome::Fallback
            }
            Err(e) => {
                let serialized = serde_json::to_string(&entry)
                    .unwrap_or_else(|_| format!("{:?}", entry));
                error!("Audit fallback failed ({:#}); entry: {}", e, serialized);
                WriteOutcome::LoggedOnly
            }
        }
    }

    /// Search stored entries
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        self.store.query(query)
    }

    /// Summarise the last `window_days` of a user's activity
    pub fn user_security_summary(&self, user_id: &str, window_days: i64) -> Result<SecuritySummary> {
        let since = self.clock.now() - Duration::days(window_days);
        self.store.user_security_summary(user_id, since)
    }

    /// Apply the configured retention policy
    pub fn prune(&self) -> Result<usize> {
        self.prune_with(&self.retention)
    }

    pub fn prune_with(&self, policy: &RetentionPolicy) -> Result<usize> {
        self.store.prune(policy, self.clock.now())
    }
}
