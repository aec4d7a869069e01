use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use crate::api::AuthApi;
use crate::audit::{AuditLogger, FileFallbackSink, RetentionPolicy, RetryPolicy, SqliteAuditStore};
use crate::cleanup::CleanupSweep;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::database::{CredentialStore, Database, SqliteCredentialStore};
use crate::email::{self, EmailSender};
use crate::security::password::{Argon2Hasher, PasswordHasher};
use crate::security::rate_limit::{InMemoryRateLimitStore, RateLimiter};
use crate::security::session::SessionManager;
use crate::user::{PasswordResetManager, RegistrationManager, VerificationManager};

/// Every component, constructed once and shared
pub struct App {
    pub config: Config,
    pub db: Database,
    pub store: Arc<dyn CredentialStore>,
    pub audit: Arc<AuditLogger>,
    pub rate_limiter: Arc<RateLimiter>,
    pub registration: Arc<RegistrationManager>,
    pub verification: Arc<VerificationManager>,
    pub sessions: Arc<SessionManager>,
    pub password_reset: Arc<PasswordResetManager>,
    pub sweep: Arc<CleanupSweep>,
    pub api: AuthApi,
}

impl App {
    /// Wire the production components for `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let mailer: Arc<dyn EmailSender> = Arc::from(email::sender_from_config(&config.email));
        Self::build(config, Arc::new(SystemClock), mailer)
    }

    /// Wire the components around a caller-supplied clock and mailer
    pub fn build(config: Config, clock: Arc<dyn Clock>, mailer: Arc<dyn EmailSender>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let db = Database::open(&config.database)?;
        let store: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(db.clone()));
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::from_config(&config.security)?);

        let audit = Arc::new(AuditLogger::new(
            Arc::new(SqliteAuditStore::new(db.clone())),
            Arc::new(FileFallbackSink::new(&config.audit.fallback_path)),
            clock.clone(),
            RetryPolicy::from_config(&config.audit),
            RetentionPolicy::from_config(&config.audit),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            config.rate_limits.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let registration = Arc::new(RegistrationManager::new(
            store.clone(), hasher.clone(), mailer.clone(), audit.clone(), clock.clone(), &config));
        let verification = Arc::new(VerificationManager::new(
            store.clone(), mailer.clone(), audit.clone(), clock.clone(), &config));
        let sessions = Arc::new(SessionManager::new(
            store.clone(), hasher.clone(), audit.clone(), clock.clone(), &config.security));
        let password_reset = Arc::new(PasswordResetManager::new(
            store.clone(), hasher, mailer, audit.clone(), clock.clone(), sessions.clone(), &config));
        let sweep = Arc::new(CleanupSweep::new(
            store.clone(), audit.clone(), rate_limiter.clone(), clock));

        let api = AuthApi::new(
            registration.clone(),
            verification.clone(),
            sessions.clone(),
            password_reset.clone(),
            rate_limiter.clone(),
        );

        info!("{} {} ready, database at {}", config.app_name, config.version, config.database.path);
        Ok(Self {
            config,
            db,
            store,
            audit,
            rate_limiter,
            registration,
            verification,
            sessions,
            password_reset,
            sweep,
            api,
        })
    }
}
