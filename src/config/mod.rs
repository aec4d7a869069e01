use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use anyhow::{bail, Result, Context};
use log::{debug, info};

/// Database configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,
    /// Maximum number of connections in the connection pool
    pub max_connections: u32,
    /// Upper bound for waiting on a locked database or a pooled connection
    pub busy_timeout_ms: u64,
}

/// Security configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SecurityConfig {
    /// HMAC secret used to sign access tokens
    pub jwt_secret: String,
    /// Issuer claim written to and required on access tokens
    pub jwt_issuer: String,
    /// Access token lifetime in minutes
    pub access_token_ttl_minutes: i64,
    /// Refresh token (session) lifetime in days
    pub refresh_token_ttl_days: i64,
    /// Verification token lifetime in hours
    pub verification_token_ttl_hours: i64,
    /// Password reset token lifetime in minutes
    pub password_reset_ttl_minutes: i64,
    /// Argon2id memory cost in KiB
    pub hash_memory_kib: u32,
    /// Argon2id iteration count
    pub hash_iterations: u32,
    /// Argon2id lanes
    pub hash_parallelism: u32,
    /// Optional server-side secret mixed into passwords before hashing
    pub password_pepper: Option<String>,
    /// Delete the session when a rotated refresh token is presented again
    pub revoke_session_on_refresh_reuse: bool,
    /// Refuse logins until the email address is verified
    pub require_verified_email: bool,
}

/// One fixed-window ceiling
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateRule {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self { max_requests, window_secs }
    }
}

/// Per-route rate limits
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub global: RateRule,
    pub register: RateRule,
    pub verify_email: RateRule,
    pub resend_verification: RateRule,
    pub login: RateRule,
    pub password_reset: RateRule,
    pub refresh: RateRule,
}

/// Audit configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditConfig {
    /// JSON-lines file that receives entries the database refused
    pub fallback_path: String,
    /// Store attempts before falling back
    pub retry_attempts: u32,
    /// Base delay for the linear backoff between attempts
    pub retry_base_delay_ms: u64,
    pub retention_low_days: i64,
    pub retention_medium_days: i64,
    pub retention_high_days: i64,
    pub retention_critical_days: i64,
}

/// Outbound email configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmailConfig {
    /// Sender address
    pub from: String,
    /// When set, messages are appended to this file instead of only logged
    pub outbox_path: Option<String>,
    /// Link prefix; the token is appended as a query parameter
    pub verification_url_base: String,
    pub password_reset_url_base: String,
}

/// Background cleanup configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CleanupConfig {
    pub interval_secs: u64,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Application version
    pub version: String,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub rate_limits: RateLimitConfig,
    pub audit: AuditConfig,
    pub email: EmailConfig,
    pub cleanup: CleanupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "TaskHub Auth".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseConfig {
                path: "data/taskhub.db".to_string(),
                max_connections: 10,
                busy_timeout_ms: 5_000,
            },
            security: SecurityConfig {
                jwt_secret: "change_me_in_production".to_string(),
                jwt_issuer: "taskhub".to_string(),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_days: 7,
                verification_token_ttl_hours: 24,
                password_reset_ttl_minutes: 60,
                hash_memory_kib: 65_536,
                hash_iterations: 3,
                hash_parallelism: 4,
                password_pepper: None,
                revoke_session_on_refresh_reuse: true,
                require_verified_email: false,
            },
            rate_limits: RateLimitConfig {
                global: RateRule::new(1000, 15 * 60),
                register: RateRule::new(5, 15 * 60),
                verify_email: RateRule::new(10, 60 * 60),
                resend_verification: RateRule::new(3, 60 * 60),
                login: RateRule::new(10, 15 * 60),
                password_reset: RateRule::new(5, 60 * 60),
                refresh: RateRule::new(60, 15 * 60),
            },
            audit: AuditConfig {
                fallback_path: "logs/audit-fallback.jsonl".to_string(),
                retry_attempts: 3,
                retry_base_delay_ms: 1_000,
                retention_low_days: 30,
                retention_medium_days: 90,
                retention_high_days: 365,
                retention_critical_days: 730,
            },
            email: EmailConfig {
                from: "no-reply@taskhub.local".to_string(),
                outbox_path: None,
                verification_url_base: "http://localhost:3000/verify-email".to_string(),
                password_reset_url_base: "http://localhost:3000/reset-password".to_string(),
            },
            cleanup: CleanupConfig {
                interval_secs: 3_600,
            },
        }
    }
}

impl Config {
    /// Reject settings the managers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.security.jwt_secret.trim().is_empty() {
            bail!("security.jwt_secret must not be empty");
        }
        if self.security.jwt_issuer.trim().is_empty() {
            bail!("security.jwt_issuer must not be empty");
        }
        if self.security.access_token_ttl_minutes <= 0 || self.security.refresh_token_ttl_days <= 0 {
            bail!("token lifetimes must be positive");
        }
        if self.security.verification_token_ttl_hours <= 0 || self.security.password_reset_ttl_minutes <= 0 {
            bail!("one-time token lifetimes must be positive");
        }
        if self.security.hash_memory_kib == 0 || self.security.hash_iterations == 0 || self.security.hash_parallelism == 0 {
            bail!("password hashing cost parameters must be non-zero");
        }
        if let Some(pepper) = &self.security.password_pepper {
            if pepper.is_empty() {
                bail!("security.password_pepper must not be empty when set");
            }
        }

        let limits = &self.rate_limits;
        for (name, rule) in [
            ("global", limits.global),
            ("register", limits.register),
            ("verify_email", limits.verify_email),
            ("resend_verification", limits.resend_verification),
            ("login", limits.login),
            ("password_reset", limits.password_reset),
            ("refresh", limits.refresh),
        ] {
            if rule.max_requests == 0 || rule.window_secs == 0 {
                bail!("rate_limits.{} must have a non-zero ceiling and window", name);
            }
        }

        if self.audit.retry_attempts == 0 {
            bail!("audit.retry_attempts must be at least 1");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if self.cleanup.interval_secs == 0 {
            bail!("cleanup.interval_secs must be positive");
        }

        Ok(())
    }
}

/// Load configuration from file, writing the defaults when it does not exist
pub fn load_config(path: &str) -> Result<Config> {
    // Check if file exists
    if !Path::new(path).exists() {
        info!("Config file {} not found, writing defaults", path);
        let default_config = Config::default();
        save_config(path, &default_config)?;
        return Ok(default_config);
    }

    // Read the config file
    let mut file = File::open(path).context(format!("Failed to open config file: {}", path))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).context("Failed to read config file")?;

    // Parse the config file
    let config: Config = match path.ends_with(".toml") {
        true => toml::from_str(&contents).context("Failed to parse TOML config")?,
        false => serde_json::from_str(&contents).context("Failed to parse JSON config")?,
    };

    debug!("Loaded configuration from {}", path);
    Ok(config)
}

/// Save configuration to file
pub fn save_config(path: &str, config: &Config) -> Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
    }

    // Serialize the config
    let serialized = match path.ends_with(".toml") {
        true => toml::to_string_pretty(config).context("Failed to serialize config to TOML")?,
        false => serde_json::to_string_pretty(config).context("Failed to serialize config to JSON")?,
    };

    // Write to file
    std::fs::write(path, serialized).context(format!("Failed to write config to file: {}", path))?;

    Ok(())
}

/// Apply `TASKHUB_*` environment overrides on top of file values
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup("TASKHUB_JWT_SECRET") {
        config.security.jwt_secret = secret;
    }
    if let Some(path) = lookup("TASKHUB_DB_PATH") {
        config.database.path = path;
    }
    if let Some(pepper) = lookup("TASKHUB_PASSWORD_PEPPER") {
        config.security.password_pepper = Some(pepper);
    }
    if let Some(value) = lookup("TASKHUB_HASH_MEMORY_KIB") {
        config.security.hash_memory_kib = value.parse()
            .context("TASKHUB_HASH_MEMORY_KIB must be an unsigned integer")?;
    }
    if let Some(value) = lookup("TASKHUB_HASH_ITERATIONS") {
        config.security.hash_iterations = value.parse()
            .context("TASKHUB_HASH_ITERATIONS must be an unsigned integer")?;
    }
    if let Some(value) = lookup("TASKHUB_ACCESS_TOKEN_TTL_MINUTES") {
        config.security.access_token_ttl_minutes = value.parse()
            .context("TASKHUB_ACCESS_TOKEN_TTL_MINUTES must be an integer")?;
    }
    if let Some(value) = lookup("TASKHUB_REFRESH_TOKEN_TTL_DAYS") {
        config.security.refresh_token_ttl_days = value.parse()
            .context("TASKHUB_REFRESH_TOKEN_TTL_DAYS must be an integer")?;
    }

    Ok(())
}
