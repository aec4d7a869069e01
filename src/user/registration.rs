use chrono::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::config::Config;
use crate::config::EmailConfig;
use crate::database::models::{AuditAction, ClientMeta, User};
use crate::database::CredentialStore;
use crate::email::{self, EmailSender};
use crate::error::{AuthError, AuthResult, StoreError};
use crate::security::password::PasswordHasher;
use crate::security::{generate_token, hash_token};
use crate::user::validation::validate_registration;
use crate::user::{deliver, normalize_email};

/// Input to `RegistrationManager::register`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
}

/// A newly created, still unverified account
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub user: User,
    /// Raw verification token; only its digest is stored
    pub verification_token: String,
    /// Whether the mailer accepted the verification message
    pub email_sent: bool,
}

pub struct RegistrationManager {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn EmailSender>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    verification_ttl: Duration,
    email_config: EmailConfig,
}

impl RegistrationManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn EmailSender>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            hasher,
            mailer,
            audit,
            clock,
            verification_ttl: Duration::hours(config.security.verification_token_ttl_hours),
            email_config: config.email.clone(),
        }
    }

    /// Register a new user
    pub fn register(&self, request: &RegistrationRequest, meta: &ClientMeta) -> AuthResult<RegistrationOutcome> {
        let errors = validate_registration(request);
        if !errors.is_empty() {
            let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
            debug!("Registration rejected, invalid fields: {:?}", fields);
            self.audit.log(
                AuditRecord::new(AuditAction::RegistrationFailed)
                    .details(json!({ "reason": "validation", "fields": fields }))
                    .client(meta),
            );
            return Err(AuthError::ValidationFailed(errors));
        }

        let email = normalize_email(&request.email);

        if let Some(existing) = self.store.find_user_by_email(&email)? {
            return Err(self.duplicate(&email, Some(&existing.id), meta));
        }

        let password_hash = self.hasher.hash(&request.password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))?;

        let now = self.clock.now();
        let token = generate_token();

        let mut user = User::new(
            email.clone(),
            password_hash,
            request.first_name.trim().to_string(),
            request.last_name.trim().to_string(),
            now,
        );
        user.verification_token_hash = Some(hash_token(&token));
        user.verification_token_expires_at = Some(now + self.verification_ttl);

        // A concurrent registration can still win between the lookup and the insert
        match self.store.create_user(&user) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(self.duplicate(&email, None, meta)),
            Err(e) => {
                warn!("Failed to store user {}: {}", email, e);
                self.audit.log(
                    AuditRecord::new(AuditAction::RegistrationFailed)
                        .details(json!({ "reason": "persistence", "email": email }))
                        .client(meta),
                );
                return Err(AuthError::Persistence(e));
            }
        }

        info!("User registered successfully: {}", user.id);
        self.audit.log(
            AuditRecord::new(AuditAction::UserRegistered)
                .user(user.id.clone())
                .details(json!({ "email": email }))
                .client(meta),
        );

        let message = email::verification_email(&user, &token, &self.email_config);
        let email_sent = deliver(
            self.mailer.as_ref(),
            &self.audit,
            &message,
            &user,
            meta,
            Some(AuditAction::VerificationEmailSent),
        );

        Ok(RegistrationOutcome {
            user,
            verification_token: token,
            email_sent,
        })
    }

    fn duplicate(&self, email: &str, existing_id: Option<&str>, meta: &ClientMeta) -> AuthError {
        warn!("Registration attempted for existing email");
        let mut record = AuditRecord::new(AuditAction::RegistrationDuplicateEmail)
            .details(json!({ "email": email }))
            .client(meta);
        if let Some(id) = existing_id {
            record = record.user(id);
        }
        self.audit.log(record);
        AuthError::DuplicateEmail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{DeliveryOutcome, MockEmailSender};
    use crate::security::password::MockPasswordHasher;
    use crate::test_util::Harness;

    fn request(email: &str) -> RegistrationRequest {
        RegistrationRequest {
            email: email.to_string(),
            password: "Str0ng!Pass".to_string(),
            confirm_password: "Str0ng!Pass".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Smith".to_string(),
        }
    }

    fn meta() -> ClientMeta {
        ClientMeta::new(Some("203.0.113.7"), Some("unit-test"))
    }

    fn manager(h: &Harness, mailer: MockEmailSender) -> RegistrationManager {
        RegistrationManager::new(
            h.store.clone(),
            h.hasher(),
            Arc::new(mailer),
            h.audit.clone(),
            h.clock.clone(),
            &h.config,
        )
    }

    #[test]
    fn test_register_sends_one_verification_email() {
        let h = Harness::new();
        let mut mailer = MockEmailSender::new();
        mailer.expect_send()
            .withf(|m| m.to == "alice@example.com" && m.text_body.contains("token="))
            .times(1)
            .returning(|_| DeliveryOutcome::Accepted);

        let outcome = manager(&h, mailer).register(&request("Alice@Example.com"), &meta()).unwrap();

        assert!(outcome.email_sent);
        assert!(outcome.verification_token.len() >= 43);
        assert_eq!(outcome.user.email, "alice@example.com");
        assert!(!outcome.user.email_verified);
        assert_eq!(
            outcome.user.verification_token_expires_at,
            Some(h.clock.now() + Duration::hours(24))
        );

        let stored = h.store.find_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(stored.verification_token_hash, Some(hash_token(&outcome.verification_token)));
        assert_ne!(stored.password_hash, "Str0ng!Pass");

        assert_eq!(
            h.audit_actions(),
            vec![AuditAction::UserRegistered, AuditAction::VerificationEmailSent]
        );
    }

    #[test]
    fn test_rejected_email_does_not_fail_registration() {
        let h = Harness::new();
        let mut mailer = MockEmailSender::new();
        mailer.expect_send()
            .times(1)
            .returning(|_| DeliveryOutcome::Rejected("smtp 550".to_string()));

        let outcome = manager(&h, mailer).register(&request("bob@example.com"), &meta()).unwrap();

        assert!(!outcome.email_sent);
        assert!(h.store.find_user_by_email("bob@example.com").unwrap().is_some());
        assert_eq!(
            h.audit_actions(),
            vec![AuditAction::UserRegistered, AuditAction::EmailSendFailed]
        );
    }

    #[test]
    fn test_duplicate_email_in_any_casing() {
        let h = Harness::new();
        let mut mailer = MockEmailSender::new();
        mailer.expect_send().times(1).returning(|_| DeliveryOutcome::Accepted);
        let manager = manager(&h, mailer);

        manager.register(&request("carol@example.com"), &meta()).unwrap();
        let err = manager.register(&request("  CAROL@example.COM "), &meta()).unwrap_err();

        assert!(matches!(err, AuthError::DuplicateEmail));
        let entries = h.audit_entries();
        let last = entries.last().unwrap();
        assert_eq!(last.action, AuditAction::RegistrationDuplicateEmail);
        assert_eq!(last.ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_validation_errors_are_aggregated() {
        let h = Harness::new();
        let mut mailer = MockEmailSender::new();
        mailer.expect_send().times(0);

        let mut bad = request("not-an-email");
        bad.confirm_password = "Other!Pass1".to_string();
        bad.last_name = "".to_string();

        match manager(&h, mailer).register(&bad, &meta()) {
            Err(AuthError::ValidationFailed(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "confirmPassword", "lastName"]);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }

        assert_eq!(h.audit_actions(), vec![AuditAction::RegistrationFailed]);
    }

    #[test]
    fn test_hashing_failure_is_internal() {
        let h = Harness::new();
        let mut hasher = MockPasswordHasher::new();
        hasher.expect_hash().returning(|_| Err(anyhow::anyhow!("out of memory")));
        let mut mailer = MockEmailSender::new();
        mailer.expect_send().times(0);

        let manager = RegistrationManager::new(
            h.store.clone(),
            Arc::new(hasher),
            Arc::new(mailer),
            h.audit.clone(),
            h.clock.clone(),
            &h.config,
        );

        let err = manager.register(&request("dan@example.com"), &meta()).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(h.store.find_user_by_email("dan@example.com").unwrap().is_none());
    }
}
