use anyhow::{anyhow, bail, Result};
use log::info;
use serde_json::json;

use crate::api::Envelope;
use crate::audit::AuditQuery;
use crate::cli::utils::{parse_date, read_line};
use crate::database::models::{AuditAction, Severity};
use crate::App;

/// Filters accepted by `audit search`
#[derive(Debug, Default)]
pub struct SearchArgs {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub min_severity: Option<String>,
    pub ip_address: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchArgs {
    fn to_query(&self) -> Result<AuditQuery> {
        let action = self.action.as_deref()
            .map(|a| AuditAction::from_str(&a.to_uppercase()))
            .transpose()
            .map_err(|e| anyhow!(e))?;
        let min_severity = self.min_severity.as_deref()
            .map(|s| Severity::from_str(&s.to_uppercase()))
            .transpose()
            .map_err(|e| anyhow!(e))?;

        Ok(AuditQuery {
            user_id: self.user_id.clone(),
            action,
            min_severity,
            ip_address: self.ip_address.clone(),
            from: self.from_date.as_deref().map(parse_date).transpose()?,
            to: self.to_date.as_deref().map(parse_date).transpose()?,
            limit: Some(self.limit),
            offset: Some(self.offset),
        })
    }
}

fn print(envelope: Envelope) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(envelope.success)
}

pub fn search(app: &App, args: &SearchArgs) -> Result<bool> {
    let query = args.to_query()?;
    let entries = app.audit.query(&query)?;

    print(Envelope {
        success: true,
        message: format!("{} audit entries", entries.len()),
        data: Some(json!({ "entries": entries })),
        errors: None,
    })
}

pub fn summary(app: &App, user_id: &str, days: i64) -> Result<bool> {
    if days <= 0 {
        bail!("--days must be positive");
    }
    let summary = app.audit.user_security_summary(user_id, days)?;

    print(Envelope {
        success: true,
        message: format!("Security summary for the last {} days", days),
        data: Some(json!({ "summary": summary })),
        errors: None,
    })
}

pub fn purge(app: &App, confirm: bool) -> Result<bool> {
    if !confirm {
        let answer = read_line("Delete audit entries past their retention period? [y/N] ")?;
        if !answer.eq_ignore_ascii_case("y") {
            println!("Aborted");
            return Ok(false);
        }
    }

    let removed = app.audit.prune()?;
    info!("Purged {} audit entries", removed);

    print(Envelope {
        success: true,
        message: format!("Purged {} audit entries", removed),
        data: Some(json!({ "removed": removed })),
        errors: None,
    })
}
