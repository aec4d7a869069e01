use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::EmailConfig;
use crate::database::models::User;

/// An outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Result of handing a message to the delivery collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    Rejected(String),
}

/// Email delivery collaborator
#[cfg_attr(test, mockall::automock)]
pub trait EmailSender: Send + Sync {
    fn send(&self, message: &EmailMessage) -> DeliveryOutcome;
}

/// Writes messages to the process log only
#[derive(Debug, Default)]
pub struct LogMailer;

impl EmailSender for LogMailer {
    fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
        info!("Email to {}: {}", message.to, message.subject);
        DeliveryOutcome::Accepted
    }
}

/// Appends messages as JSON lines to an outbox file for a relay to pick up
pub struct OutboxMailer {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutboxMailer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, message: &EmailMessage) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).context("Failed to create outbox directory")?;
            }
        }

        let line = serde_json::to_string(message).context("Failed to serialize email")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open outbox file: {}", self.path.display()))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .context("Failed to write to outbox file")?;

        Ok(())
    }
}

impl EmailSender for OutboxMailer {
    fn send(&self, message: &EmailMessage) -> DeliveryOutcome {
        match self.append(message) {
            Ok(()) => {
                info!("Queued email to {} in {}", message.to, self.path.display());
                DeliveryOutcome::Accepted
            }
            Err(e) => {
                warn!("Outbox rejected email to {}: {:#}", message.to, e);
                DeliveryOutcome::Rejected(e.to_string())
            }
        }
    }
}

/// Pick the sender configured for this deployment
pub fn sender_from_config(config: &EmailConfig) -> Box<dyn EmailSender> {
    match &config.outbox_path {
        Some(path) => Box::new(OutboxMailer::new(path)),
        None => Box::new(LogMailer),
    }
}

fn link(base: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base, separator, token)
}

/// Message carrying a fresh email verification token
pub fn verification_email(user: &User, token: &str, config: &EmailConfig) -> EmailMessage {
    let url = link(&config.verification_url_base, token);

    EmailMessage {
        to: user.email.clone(),
        subject: "Verify your TaskHub email address".to_string(),
        html_body: format!(
            "<p>Hi {},</p><p>Confirm your email address by opening <a href=\"{}\">this link</a>.</p>",
            user.first_name, url
        ),
        text_body: format!(
            "Hi {},\n\nConfirm your email address by opening this link:\n{}\n",
            user.first_name, url
        ),
    }
}

/// Message carrying a password reset token
pub fn password_reset_email(user: &User, token: &str, config: &EmailConfig) -> EmailMessage {
    let url = link(&config.password_reset_url_base, token);

    EmailMessage {
        to: user.email.clone(),
        subject: "Reset your TaskHub password".to_string(),
        html_body: format!(
            "<p>Hi {},</p><p>Choose a new password <a href=\"{}\">here</a>. \
             If you did not ask for this, ignore this message.</p>",
            user.first_name, url
        ),
        text_body: format!(
            "Hi {},\n\nChoose a new password here:\n{}\n\nIf you did not ask for this, ignore this message.\n",
            user.first_name, url
        ),
    }
}
