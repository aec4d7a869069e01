use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Row};

use crate::audit::{AuditQuery, AuditStore, RetentionPolicy, SecuritySummary};
use crate::database::models::{AuditAction, AuditLogEntry, Severity};
use crate::database::{fmt_ts, parse_opt_ts, parse_ts, Database};

const DEFAULT_QUERY_LIMIT: usize = 100;

/// Audit log table in the shared SQLite database
#[derive(Clone)]
pub struct SqliteAuditStore {
    db: Database,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLogEntry> {
    let conversion = |idx: usize, e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx, rusqlite::types::Type::Text, e.into())
    };

    let action: String = row.get(1)?;
    let severity: String = row.get(3)?;
    let details: String = row.get(4)?;

    Ok(AuditLogEntry {
        id: row.get(0)?,
        action: AuditAction::from_str(&action).map_err(|e| conversion(1, e))?,
        user_id: row.get(2)?,
        severity: Severity::from_str(&severity).map_err(|e| conversion(3, e))?,
        // Details written by older tooling may not be JSON; keep them verbatim
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::String(details)),
        ip_address: row.get(5)?,
        user_agent: row.get(6)?,
        timestamp: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}

impl SqliteAuditStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl AuditStore for SqliteAuditStore {
    fn save(&self, entry: &AuditLogEntry) -> Result<()> {
        let conn = self.db.connection()?;

        conn.execute(
            "INSERT INTO audit_logs (
                id, action, user_id, severity, severity_rank,
                details, ip_address, user_agent, timestamp
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
            )",
            params![
                entry.id,
                entry.action.as_str(),
                entry.user_id,
                entry.severity.as_str(),
                entry.severity.rank(),
                entry.details.to_string(),
                entry.ip_address,
                entry.user_agent,
                fmt_ts(&entry.timestamp),
            ],
        ).context("Failed to insert audit log")?;

        debug!("Saved audit log with ID: {}", entry.id);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>> {
        let conn = self.db.connection()?;

        // Build the query dynamically based on filters
        let mut sql = String::from(
            "SELECT id, action, user_id, severity, details, ip_address, user_agent, timestamp
             FROM audit_logs
             WHERE 1=1"
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(user_id) = &query.user_id {
            sql.push_str(" AND user_id = ?");
            values.push(Box::new(user_id.clone()));
        }
        if let Some(action) = query.action {
            sql.push_str(" AND action = ?");
            values.push(Box::new(action.as_str()));
        }
        if let Some(severity) = query.min_severity {
            sql.push_str(" AND severity_rank >= ?");
            values.push(Box::new(severity.rank()));
        }
        if let Some(ip_address) = &query.ip_address {
            sql.push_str(" AND ip_address = ?");
            values.push(Box::new(ip_address.clone()));
        }
        if let Some(from) = &query.from {
            sql.push_str(" AND timestamp >= ?");
            values.push(Box::new(fmt_ts(from)));
        }
        if let Some(to) = &query.to {
            sql.push_str(" AND timestamp <= ?");
            values.push(Box::new(fmt_ts(to)));
        }

        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?");
        values.push(Box::new(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64));
        values.push(Box::new(query.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql)
            .context("Failed to prepare statement for searching audit logs")?;

        let rows = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            entry_from_row,
        ).context("Failed to query audit logs with filters")?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.context("Failed to process audit log row")?);
        }

        Ok(result)
    }

    fn user_security_summary(&self, user_id: &str, since: DateTime<Utc>) -> Result<SecuritySummary> {
        let conn = self.db.connection()?;
        let since_str = fmt_ts(&since);

        let mut summary = SecuritySummary {
            user_id: user_id.to_string(),
            since: Some(since),
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT action, severity, COUNT(*)
             FROM audit_logs
             WHERE user_id = ?1 AND timestamp >= ?2
             GROUP BY action, severity"
        ).context("Failed to prepare audit summary statement")?;

        let rows = stmt.query_map(params![user_id, since_str], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        }).context("Failed to summarise audit logs")?;

        for row in rows {
            let (action, severity, count) = row.context("Failed to process audit summary row")?;
            let count = count as u64;

            summary.total_events += count;
            *summary.by_action.entry(action.clone()).or_insert(0) += count;
            *summary.by_severity.entry(severity).or_insert(0) += count;

            if action == AuditAction::LoginFailed.as_str() {
                summary.failed_logins += count;
            }
        }

        let (distinct_ips, last_login): (i64, Option<String>) = conn.query_row(
            "SELECT
                COUNT(DISTINCT ip_address),
                MAX(CASE WHEN action = ?3 THEN timestamp END)
             FROM audit_logs
             WHERE user_id = ?1 AND timestamp >= ?2",
            params![user_id, since_str, AuditAction::UserLogin.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ).context("Failed to read audit summary totals")?;

        summary.distinct_ips = distinct_ips as u64;
        summary.last_login_at = parse_opt_ts(1, last_login)?;

        Ok(summary)
    }

    fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction().context("Failed to start audit prune transaction")?;

        let mut removed = 0;
        for severity in Severity::all() {
            let cutoff = fmt_ts(&policy.cutoff(severity, now));
            removed += tx.execute(
                "DELETE FROM audit_logs WHERE severity_rank = ?1 AND timestamp < ?2",
                params![severity.rank(), cutoff],
            ).context(format!("Failed to prune {} audit logs", severity.as_str()))?;
        }

        tx.commit().context("Failed to commit audit prune")?;

        debug!("Pruned {} audit log entries", removed);
        Ok(removed)
    }
}
