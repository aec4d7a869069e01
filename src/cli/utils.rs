use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::io::{self, Write};

use crate::api::{ApiResponse, RequestContext};

/// Read a line of input from the terminal
pub fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input).context("Failed to read from stdin")?;

    Ok(input.trim().to_string())
}

/// Read a secret, prompting only when it was not passed on the command line
pub fn secret_or_prompt(value: Option<&str>, prompt: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v.to_string()),
        None => read_line(prompt),
    }
}

/// Request context for commands issued from this terminal
pub fn local_context(token: Option<&str>) -> RequestContext {
    let ctx = RequestContext::new(Some("127.0.0.1"), Some(concat!("taskhub-auth-cli/", env!("CARGO_PKG_VERSION"))));
    match token {
        Some(t) => ctx.with_bearer(t),
        None => ctx,
    }
}

/// Print a response envelope as JSON and report whether it succeeded
pub fn print_response(response: &ApiResponse) -> Result<bool> {
    let rendered = serde_json::to_string_pretty(&response.body).context("Failed to render response")?;
    println!("{}", rendered);
    Ok(response.is_success())
}

/// Parse a `YYYY-MM-DD` date as midnight UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .context(format!("Invalid date '{}', expected YYYY-MM-DD", value))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("Invalid date")?;
    Ok(Utc.from_utc_datetime(&midnight))
}
