//! Email verification: `Unverified` moves to `Verified` exactly once, by
//! consuming a live token. Expired, unknown or already-used tokens leave the
//! account unverified.

use chrono::Duration;
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::config::{Config, EmailConfig};
use crate::database::models::{AuditAction, ClientMeta, User};
use crate::database::CredentialStore;
use crate::email::{self, EmailSender};
use crate::error::{AuthError, AuthResult};
use crate::security::{generate_token, hash_token};
use crate::user::validation::validate_email;
use crate::user::{deliver, normalize_email};

pub struct VerificationManager {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn EmailSender>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    verification_ttl: Duration,
    email_config: EmailConfig,
}

impl VerificationManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn EmailSender>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            mailer,
            audit,
            clock,
            verification_ttl: Duration::hours(config.security.verification_token_ttl_hours),
            email_config: config.email.clone(),
        }
    }

    /// Consume a verification token and mark its owner verified
    pub fn verify_email(&self, token: &str, meta: &ClientMeta) -> AuthResult<User> {
        let token = token.trim();
        let consumed = if token.is_empty() {
            None
        } else {
            self.store.consume_verification_token(&hash_token(token), self.clock.now())?
        };

        match consumed {
            Some(user) => {
                info!("Email verified for user {}", user.id);
                self.audit.log(
                    AuditRecord::new(AuditAction::EmailVerified)
                        .user(user.id.clone())
                        .client(meta),
                );
                Ok(user)
            }
            None => {
                debug!("Verification token rejected");
                self.audit.log(
                    AuditRecord::new(AuditAction::EmailVerificationFailed)
                        .details(json!({ "reason": "invalid_or_expired_token" }))
                        .client(meta),
                );
                Err(AuthError::InvalidOrExpiredToken)
            }
        }
    }

    /// Issue a fresh token to an unverified account.
    ///
    /// Succeeds for unknown and already-verified addresses too, so the caller
    /// learns nothing about which accounts exist.
    pub fn resend_verification(&self, email: &str, meta: &ClientMeta) -> AuthResult<()> {
        let email = normalize_email(email);
        if !validate_email(&email) {
            return Ok(());
        }

        let user = match self.store.find_user_by_email(&email)? {
            Some(user) if !user.email_verified && user.is_active => user,
            _ => {
                debug!("Resend requested for an ineligible address");
                return Ok(());
            }
        };

        let now = self.clock.now();
        let token = generate_token();

        // The account may have been verified since the lookup
        if !self.store.replace_verification_token(&user.id, &hash_token(&token), now + self.verification_ttl, now)? {
            return Ok(());
        }

        self.audit.log(
            AuditRecord::new(AuditAction::VerificationResent)
                .user(user.id.clone())
                .client(meta),
        );

        let message = email::verification_email(&user, &token, &self.email_config);
        deliver(
            self.mailer.as_ref(),
            &self.audit,
            &message,
            &user,
            meta,
            Some(AuditAction::VerificationEmailSent),
        );

        Ok(())
    }
}
