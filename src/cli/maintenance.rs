use anyhow::{Context, Result};
use log::info;
use serde_json::json;
use std::sync::mpsc;
use std::time::Duration;

use crate::api::Envelope;
use crate::App;

/// Report the schema and configuration that `App` just set up
pub fn init(app: &App, config_path: &str) -> Result<bool> {
    let envelope = Envelope {
        success: true,
        message: "TaskHub auth store initialized".to_string(),
        data: Some(json!({
            "config": config_path,
            "database": app.config.database.path,
            "auditFallback": app.config.audit.fallback_path,
        })),
        errors: None,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(true)
}

/// Run one cleanup sweep, or keep sweeping until interrupted
pub fn sweep(app: &App, daemon: bool, interval_secs: Option<u64>) -> Result<bool> {
    if !daemon {
        let report = app.sweep.run_once();
        let envelope = match report {
            Some(report) => Envelope {
                success: report.failed_steps.is_empty(),
                message: format!("Removed {} expired record(s)", report.total_removed()),
                data: Some(json!({ "report": report })),
                errors: None,
            },
            None => Envelope {
                success: false,
                message: "A cleanup sweep is already running".to_string(),
                data: None,
                errors: None,
            },
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(envelope.success);
    }

    let interval = Duration::from_secs(interval_secs.unwrap_or(app.config.cleanup.interval_secs));
    let handle = app.sweep.spawn(interval).context("Failed to start cleanup thread")?;
    info!("Sweeping every {:?}; press Enter to stop", interval);

    // Block on stdin so the daemon stops cleanly on Enter or EOF
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    let _ = rx.recv();

    handle.stop();
    Ok(true)
}
