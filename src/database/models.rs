use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request metadata captured for audit and session records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_info: Option<String>,
}

impl ClientMeta {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            device_info: None,
        }
    }

    /// Key used for per-client rate limiting
    pub fn client_key(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("unknown")
    }
}

/// User model
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email_verified: bool,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub verification_token_hash: Option<String>,
    pub verification_token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub password_reset_token_hash: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            first_name,
            last_name,
            email_verified: false,
            is_active: true,
            verification_token_hash: None,
            verification_token_expires_at: None,
            password_reset_token_hash: None,
            password_reset_expires_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Login session backing one refresh token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    #[serde(skip_serializing)]
    pub previous_refresh_token_hash: Option<String>,
    pub access_token_id: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// New token values written by a refresh rotation
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub new_refresh_token_hash: String,
    pub access_token_id: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Why a token was revoked
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    LogoutAllDevices,
    PasswordReset,
    RefreshTokenReuse,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Logout => "logout",
            RevocationReason::LogoutAllDevices => "logout_all_devices",
            RevocationReason::PasswordReset => "password_reset",
            RevocationReason::RefreshTokenReuse => "refresh_token_reuse",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "logout" => Ok(RevocationReason::Logout),
            "logout_all_devices" => Ok(RevocationReason::LogoutAllDevices),
            "password_reset" => Ok(RevocationReason::PasswordReset),
            "refresh_token_reuse" => Ok(RevocationReason::RefreshTokenReuse),
            _ => Err(format!("Invalid revocation reason: {}", s)),
        }
    }
}

/// Revoked access token record
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenBlacklistEntry {
    pub id: String,
    pub token_id: String,
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub reason: RevocationReason,
    pub created_at: DateTime<Utc>,
}

impl TokenBlacklistEntry {
    pub fn new(
        token_id: String,
        user_id: Option<String>,
        expires_at: DateTime<Utc>,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token_id,
            user_id,
            expires_at,
            reason,
            created_at: now,
        }
    }
}

/// Record kinds removed by the cleanup sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredKind {
    VerificationTokens,
    PasswordResetTokens,
    Sessions,
    BlacklistEntries,
}

impl ExpiredKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiredKind::VerificationTokens => "verification_tokens",
            ExpiredKind::PasswordResetTokens => "password_reset_tokens",
            ExpiredKind::Sessions => "sessions",
            ExpiredKind::BlacklistEntries => "blacklist_entries",
        }
    }
}

/// Audit severity, ordered from least to most severe
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }

    /// Numeric rank persisted next to the label for range filters
    pub fn rank(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn all() -> [Severity; 4] {
        [Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
    }
}

/// Audit action type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    UserRegistered,
    RegistrationDuplicateEmail,
    RegistrationFailed,
    VerificationEmailSent,
    VerificationResent,
    EmailSendFailed,
    EmailVerified,
    EmailVerificationFailed,
    UserLogin,
    LoginFailed,
    TokenRefreshed,
    RefreshFailed,
    RefreshTokenReuse,
    SessionExpired,
    UserLogout,
    PasswordResetRequested,
    PasswordResetCompleted,
    PasswordResetFailed,
    RateLimitExceeded,
    CleanupCompleted,
    CleanupFailed,
    SecurityEvent,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegistered => "USER_REGISTERED",
            AuditAction::RegistrationDuplicateEmail => "REGISTRATION_DUPLICATE_EMAIL",
            AuditAction::RegistrationFailed => "REGISTRATION_FAILED",
            AuditAction::VerificationEmailSent => "VERIFICATION_EMAIL_SENT",
            AuditAction::VerificationResent => "VERIFICATION_RESENT",
            AuditAction::EmailSendFailed => "EMAIL_SEND_FAILED",
            AuditAction::EmailVerified => "EMAIL_VERIFIED",
            AuditAction::EmailVerificationFailed => "EMAIL_VERIFICATION_FAILED",
            AuditAction::UserLogin => "USER_LOGIN",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::TokenRefreshed => "TOKEN_REFRESHED",
            AuditAction::RefreshFailed => "REFRESH_FAILED",
            AuditAction::RefreshTokenReuse => "REFRESH_TOKEN_REUSE",
            AuditAction::SessionExpired => "SESSION_EXPIRED",
            AuditAction::UserLogout => "USER_LOGOUT",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditAction::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            AuditAction::PasswordResetFailed => "PASSWORD_RESET_FAILED",
            AuditAction::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AuditAction::CleanupCompleted => "CLEANUP_COMPLETED",
            AuditAction::CleanupFailed => "CLEANUP_FAILED",
            AuditAction::SecurityEvent => "SECURITY_EVENT",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "USER_REGISTERED" => Ok(AuditAction::UserRegistered),
            "REGISTRATION_DUPLICATE_EMAIL" => Ok(AuditAction::RegistrationDuplicateEmail),
            "REGISTRATION_FAILED" => Ok(AuditAction::RegistrationFailed),
            "VERIFICATION_EMAIL_SENT" => Ok(AuditAction::VerificationEmailSent),
            "VERIFICATION_RESENT" => Ok(AuditAction::VerificationResent),
            "EMAIL_SEND_FAILED" => Ok(AuditAction::EmailSendFailed),
            "EMAIL_VERIFIED" => Ok(AuditAction::EmailVerified),
            "EMAIL_VERIFICATION_FAILED" => Ok(AuditAction::EmailVerificationFailed),
            "USER_LOGIN" => Ok(AuditAction::UserLogin),
            "LOGIN_FAILED" => Ok(AuditAction::LoginFailed),
            "TOKEN_REFRESHED" => Ok(AuditAction::TokenRefreshed),
            "REFRESH_FAILED" => Ok(AuditAction::RefreshFailed),
            "REFRESH_TOKEN_REUSE" => Ok(AuditAction::RefreshTokenReuse),
            "SESSION_EXPIRED" => Ok(AuditAction::SessionExpired),
            "USER_LOGOUT" => Ok(AuditAction::UserLogout),
            "PASSWORD_RESET_REQUESTED" => Ok(AuditAction::PasswordResetRequested),
            "PASSWORD_RESET_COMPLETED" => Ok(AuditAction::PasswordResetCompleted),
            "PASSWORD_RESET_FAILED" => Ok(AuditAction::PasswordResetFailed),
            "RATE_LIMIT_EXCEEDED" => Ok(AuditAction::RateLimitExceeded),
            "CLEANUP_COMPLETED" => Ok(AuditAction::CleanupCompleted),
            "CLEANUP_FAILED" => Ok(AuditAction::CleanupFailed),
            "SECURITY_EVENT" => Ok(AuditAction::SecurityEvent),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }

    /// Severity used when the caller does not supply one
    pub fn default_severity(&self) -> Severity {
        match self {
            AuditAction::RefreshTokenReuse => Severity::Critical,

            AuditAction::LoginFailed
            | AuditAction::RateLimitExceeded
            | AuditAction::RegistrationDuplicateEmail
            | AuditAction::PasswordResetFailed
            | AuditAction::RefreshFailed
            | AuditAction::CleanupFailed
            | AuditAction::SecurityEvent => Severity::High,

            AuditAction::UserRegistered
            | AuditAction::RegistrationFailed
            | AuditAction::EmailSendFailed
            | AuditAction::EmailVerificationFailed
            | AuditAction::EmailVerified
            | AuditAction::UserLogin
            | AuditAction::UserLogout
            | AuditAction::SessionExpired
            | AuditAction::PasswordResetRequested
            | AuditAction::PasswordResetCompleted => Severity::Medium,

            AuditAction::VerificationEmailSent
            | AuditAction::VerificationResent
            | AuditAction::TokenRefreshed
            | AuditAction::CleanupCompleted => Severity::Low,
        }
    }
}

/// Persisted audit log entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditLogEntry {
    pub id: String,
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub severity: Severity,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}
