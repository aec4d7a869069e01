use log::warn;
use serde_json::json;

use crate::audit::{AuditLogger, AuditRecord};
use crate::database::models::{AuditAction, ClientMeta, User};
use crate::email::{DeliveryOutcome, EmailMessage, EmailSender};

pub mod password_reset;
pub mod registration;
pub mod validation;
pub mod verification;

pub use password_reset::PasswordResetManager;
pub use registration::{RegistrationManager, RegistrationOutcome, RegistrationRequest};
pub use verification::VerificationManager;

/// Normalized form used for lookups and storage
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hand a message to the mailer and audit the outcome.
///
/// Delivery problems are never returned to the caller; the user row is
/// already committed by the time a message is sent.
pub(crate) fn deliver(
    mailer: &dyn EmailSender,
    audit: &AuditLogger,
    message: &EmailMessage,
    user: &User,
    meta: &ClientMeta,
    sent_action: Option<AuditAction>,
) -> bool {
    match mailer.send(message) {
        DeliveryOutcome::Accepted => {
            if let Some(action) = sent_action {
                audit.log(
                    AuditRecord::new(action)
                        .user(user.id.clone())
                        .details(json!({ "subject": message.subject }))
                        .client(meta),
                );
            }
            true
        }
        DeliveryOutcome::Rejected(reason) => {
            warn!("Email to user {} was rejected: {}", user.id, reason);
            audit.log(
                AuditRecord::new(AuditAction::EmailSendFailed)
                    .user(user.id.clone())
                    .details(json!({ "subject": message.subject, "reason": reason }))
                    .client(meta),
            );
            false
        }
    }
}
