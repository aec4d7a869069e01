use chrono::Duration;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::config::{Config, EmailConfig};
use crate::database::models::{AuditAction, ClientMeta, RevocationReason};
use crate::database::CredentialStore;
use crate::email::{self, EmailSender};
use crate::error::{AuthError, AuthResult};
use crate::security::password::PasswordHasher;
use crate::security::session::SessionManager;
use crate::security::{generate_token, hash_token};
use crate::user::validation::{validate_email, validate_new_password};
use crate::user::{deliver, normalize_email};

/// Forgot-password flow: a short-lived single-use token sent by email
/// that can be traded for a new password once.
pub struct PasswordResetManager {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn EmailSender>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    sessions: Arc<SessionManager>,
    reset_ttl: Duration,
    email_config: EmailConfig,
}

impl PasswordResetManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn EmailSender>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        sessions: Arc<SessionManager>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            hasher,
            mailer,
            audit,
            clock,
            sessions,
            reset_ttl: Duration::minutes(config.security.password_reset_ttl_minutes),
            email_config: config.email.clone(),
        }
    }

    /// Email a reset link if the address belongs to an active account.
    /// The caller sees the same result either way.
    pub fn request_password_reset(&self, email: &str, meta: &ClientMeta) -> AuthResult<()> {
        let email = normalize_email(email);
        if !validate_email(&email) {
            return Ok(());
        }

        let user = match self.store.find_user_by_email(&email)? {
            Some(user) if user.is_active => user,
            _ => {
                debug!("Password reset requested for an ineligible address");
                return Ok(());
            }
        };

        let now = self.clock.now();
        let token = generate_token();
        if !self.store.set_password_reset_token(&user.id, &hash_token(&token), now + self.reset_ttl, now)? {
            return Ok(());
        }

        self.audit.log(
            AuditRecord::new(AuditAction::PasswordResetRequested)
                .user(user.id.clone())
                .client(meta),
        );

        let message = email::password_reset_email(&user, &token, &self.email_config);
        deliver(self.mailer.as_ref(), &self.audit, &message, &user, meta, None);

        Ok(())
    }

    /// Trade a reset token for a new password, ending every open session
    pub fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
        meta: &ClientMeta,
    ) -> AuthResult<()> {
        let errors = validate_new_password(new_password, confirm_password);
        if !errors.is_empty() {
            self.failed("validation", meta);
            return Err(AuthError::ValidationFailed(errors));
        }

        let token = token.trim();
        if token.is_empty() {
            self.failed("invalid_or_expired_token", meta);
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let password_hash = self.hasher.hash(new_password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))?;

        let user = match self.store.consume_password_reset_token(&hash_token(token), &password_hash, self.clock.now())? {
            Some(user) => user,
            None => {
                self.failed("invalid_or_expired_token", meta);
                return Err(AuthError::InvalidOrExpiredToken);
            }
        };

        let revoked = self.sessions.revoke_all_for_user(&user.id, RevocationReason::PasswordReset)?;

        info!("Password reset for user {}, {} session(s) revoked", user.id, revoked);
        self.audit.log(
            AuditRecord::new(AuditAction::PasswordResetCompleted)
                .user(user.id.clone())
                .details(json!({ "sessionsRevoked": revoked }))
                .client(meta),
        );

        Ok(())
    }

    fn failed(&self, reason: &str, meta: &ClientMeta) {
        warn!("Password reset rejected ({})", reason);
        self.audit.log(
            AuditRecord::new(AuditAction::PasswordResetFailed)
                .details(json!({ "reason": reason }))
                .client(meta),
        );
    }
}
