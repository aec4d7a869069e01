use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::config::SecurityConfig;
use crate::database::models::{
    AuditAction, ClientMeta, RevocationReason, Session, SessionRotation, TokenBlacklistEntry, User,
};
use crate::database::CredentialStore;
use crate::error::{AuthError, AuthResult};
use crate::security::jwt::TokenIssuer;
use crate::security::password::PasswordHasher;
use crate::security::{generate_token, hash_token};
use crate::user::normalize_email;

/// Credentials handed to a client after login or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: String,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub session_id: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogoutOutcome {
    pub sessions_revoked: usize,
}

/// Client-facing view of an active session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

/// Session & token manager
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    issuer: TokenIssuer,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    refresh_ttl: Duration,
    revoke_on_reuse: bool,
    require_verified_email: bool,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            issuer: TokenIssuer::from_config(config),
            audit,
            clock,
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
            revoke_on_reuse: config.revoke_session_on_refresh_reuse,
            require_verified_email: config.require_verified_email,
        }
    }

    /// Authenticate with email and password and open a new session
    pub fn login(&self, email: &str, password: &str, meta: &ClientMeta) -> AuthResult<TokenPair> {
        let email = normalize_email(email);

        let user = match self.store.find_user_by_email(&email)? {
            Some(user) => user,
            None => return Err(self.login_failed(&email, None, "unknown_user", meta)),
        };

        let password_ok = match self.hasher.verify(password, &user.password_hash) {
            Ok(ok) => ok,
            Err(e) => {
                error!("Stored password hash for user {} is unreadable: {:#}", user.id, e);
                false
            }
        };
        if !password_ok {
            return Err(self.login_failed(&email, Some(&user.id), "bad_password", meta));
        }
        if !user.is_active {
            return Err(self.login_failed(&email, Some(&user.id), "inactive", meta));
        }
        if self.require_verified_email && !user.email_verified {
            self.login_failed(&email, Some(&user.id), "unverified", meta);
            return Err(AuthError::EmailNotVerified);
        }

        let now = self.clock.now();
        let session_id = Uuid::new_v4().to_string();
        let access = self.issuer.issue(&user.id, &session_id, now)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let refresh_token = generate_token();

        let session = Session {
            id: session_id.clone(),
            user_id: user.id.clone(),
            refresh_token_hash: hash_token(&refresh_token),
            previous_refresh_token_hash: None,
            access_token_id: access.jti.clone(),
            access_token_expires_at: access.expires_at,
            expires_at: now + self.refresh_ttl,
            device_info: meta.device_info.clone(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: now,
            last_activity_at: now,
        };
        self.store.create_session(&session)?;
        self.store.record_login(&user.id, now)?;

        info!("User {} logged in, session {}", user.id, session_id);
        self.audit.log(
            AuditRecord::new(AuditAction::UserLogin)
                .user(user.id.clone())
                .details(json!({ "sessionId": session_id }))
                .client(meta),
        );

        Ok(self.token_pair(access.token, refresh_token, session_id))
    }

    /// Exchange a refresh token for a new token pair, rotating the refresh token
    pub fn refresh(&self, refresh_token: &str, meta: &ClientMeta) -> AuthResult<TokenPair> {
        let presented_hash = hash_token(refresh_token.trim());
        let now = self.clock.now();

        let session = match self.store.find_session_by_refresh_hash(&presented_hash)? {
            Some(session) => session,
            None => return Err(self.unknown_refresh_token(&presented_hash, meta)?),
        };

        if session.is_expired(now) {
            self.store.delete_session(&session.id)?;
            self.audit.log(
                AuditRecord::new(AuditAction::SessionExpired)
                    .user(session.user_id.clone())
                    .details(json!({ "sessionId": session.id }))
                    .client(meta),
            );
            return Err(AuthError::SessionExpired);
        }

        let user = self.store.find_user_by_id(&session.user_id)?;
        if !user.as_ref().map(|u| u.is_active).unwrap_or(false) {
            self.store.delete_session(&session.id)?;
            self.refresh_failed(Some(&session.user_id), "inactive_user", meta);
            return Err(AuthError::InvalidRefreshToken);
        }

        let access = self.issuer.issue(&session.user_id, &session.id, now)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let new_refresh_token = generate_token();

        let rotation = SessionRotation {
            new_refresh_token_hash: hash_token(&new_refresh_token),
            access_token_id: access.jti.clone(),
            access_token_expires_at: access.expires_at,
            expires_at: now + self.refresh_ttl,
            last_activity_at: now,
        };

        // Loses only when another request rotated the same token first
        if !self.store.rotate_session(&session.id, &presented_hash, &rotation)? {
            self.refresh_failed(Some(&session.user_id), "concurrent_rotation", meta);
            return Err(AuthError::InvalidRefreshToken);
        }

        debug!("Rotated refresh token for session {}", session.id);
        self.audit.log(
            AuditRecord::new(AuditAction::TokenRefreshed)
                .user(session.user_id.clone())
                .details(json!({ "sessionId": session.id }))
                .client(meta),
        );

        Ok(self.token_pair(access.token, new_refresh_token, session.id))
    }

    /// Resolve a bearer token to an identity; any failure yields `None`
    pub fn authenticate(&self, bearer: Option<&str>) -> Option<AuthContext> {
        let raw = bearer?.trim();
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token.is_empty() {
            return None;
        }

        let now = self.clock.now();
        let claims = match self.issuer.validate(token, now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Rejected access token: {:#}", e);
                return None;
            }
        };

        match self.store.find_blacklist_entry(&claims.jti, now) {
            Ok(None) => {}
            Ok(Some(_)) => {
                debug!("Access token {} is revoked", claims.jti);
                return None;
            }
            Err(e) => {
                warn!("Blacklist lookup failed, treating request as anonymous: {}", e);
                return None;
            }
        }

        // Revoking a session retires every access token issued under it
        match self.store.find_session(&claims.sid) {
            Ok(Some(session)) if session.user_id == claims.sub && !session.is_expired(now) => {}
            Ok(_) => {
                debug!("Access token {} belongs to an ended session", claims.jti);
                return None;
            }
            Err(e) => {
                warn!("Session lookup failed, treating request as anonymous: {}", e);
                return None;
            }
        }

        let user = match self.store.find_user_by_id(&claims.sub) {
            Ok(Some(user)) if user.is_active => user,
            Ok(_) => return None,
            Err(e) => {
                warn!("User lookup failed, treating request as anonymous: {}", e);
                return None;
            }
        };

        Some(AuthContext {
            expires_at: claims.expires_at(),
            user_id: user.id,
            email: user.email,
            session_id: claims.sid,
            token_id: claims.jti,
        })
    }

    /// Like `authenticate`, for routes that cannot serve anonymous callers
    pub fn require_auth(&self, bearer: Option<&str>) -> AuthResult<AuthContext> {
        self.authenticate(bearer).ok_or(AuthError::Unauthorized)
    }

    /// End one session, or every session of its user
    pub fn logout(&self, session_id: &str, all_devices: bool, meta: &ClientMeta) -> AuthResult<LogoutOutcome> {
        let session = self.store.find_session(session_id)?.ok_or(AuthError::Unauthorized)?;

        let (removed, reason) = if all_devices {
            (self.store.delete_sessions_for_user(&session.user_id)?, RevocationReason::LogoutAllDevices)
        } else {
            (self.store.delete_session(&session.id)?.into_iter().collect::<Vec<_>>(), RevocationReason::Logout)
        };

        self.blacklist_sessions(&removed, reason)?;

        info!("User {} logged out of {} session(s)", session.user_id, removed.len());
        self.audit.log(
            AuditRecord::new(AuditAction::UserLogout)
                .user(session.user_id.clone())
                .details(json!({
                    "sessionId": session.id,
                    "allDevices": all_devices,
                    "sessionsRevoked": removed.len(),
                }))
                .client(meta),
        );

        Ok(LogoutOutcome { sessions_revoked: removed.len() })
    }

    /// Revoke every session of a user, blacklisting their access tokens
    pub fn revoke_all_for_user(&self, user_id: &str, reason: RevocationReason) -> AuthResult<usize> {
        let removed = self.store.delete_sessions_for_user(user_id)?;
        self.blacklist_sessions(&removed, reason)?;
        Ok(removed.len())
    }

    /// Active sessions of a user, newest first
    pub fn list_sessions(&self, user_id: &str, current_session_id: Option<&str>) -> AuthResult<Vec<SessionSummary>> {
        let now = self.clock.now();
        let sessions = self.store.list_sessions_for_user(user_id)?;

        Ok(sessions
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .map(|s| SessionSummary {
                current: current_session_id == Some(s.id.as_str()),
                id: s.id,
                device_info: s.device_info,
                ip_address: s.ip_address,
                user_agent: s.user_agent,
                created_at: s.created_at,
                last_activity_at: s.last_activity_at,
                expires_at: s.expires_at,
            })
            .collect())
    }

    /// Load the user behind an authenticated request
    pub fn current_user(&self, context: &AuthContext) -> AuthResult<User> {
        self.store.find_user_by_id(&context.user_id)?.ok_or(AuthError::Unauthorized)
    }

    fn token_pair(&self, access_token: String, refresh_token: String, session_id: String) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.issuer.ttl().num_seconds(),
            session_id,
        }
    }

    fn blacklist_sessions(&self, sessions: &[Session], reason: RevocationReason) -> AuthResult<()> {
        let now = self.clock.now();
        for session in sessions {
            let entry = TokenBlacklistEntry::new(
                session.access_token_id.clone(),
                Some(session.user_id.clone()),
                session.access_token_expires_at,
                reason,
                now,
            );
            if !self.store.insert_blacklist_entry(&entry)? {
                debug!("Access token {} was already revoked", session.access_token_id);
            }
        }
        Ok(())
    }

    // A refresh token that matches no live session is either garbage or one
    // that was already rotated away, however many rotations ago. The latter means it leaked.
    fn unknown_refresh_token(&self, presented_hash: &str, meta: &ClientMeta) -> AuthResult<AuthError> {
        let session = match self.store.find_session_by_retired_refresh_hash(presented_hash)? {
            Some(session) => session,
            None => {
                self.refresh_failed(None, "unknown_token", meta);
                return Ok(AuthError::InvalidRefreshToken);
            }
        };

        warn!("Rotated refresh token presented again for session {}", session.id);
        self.audit.log(
            AuditRecord::new(AuditAction::RefreshTokenReuse)
                .user(session.user_id.clone())
                .details(json!({
                    "sessionId": session.id,
                    "sessionRevoked": self.revoke_on_reuse,
                }))
                .client(meta),
        );

        if self.revoke_on_reuse {
            let removed: Vec<Session> = self.store.delete_session(&session.id)?.into_iter().collect();
            self.blacklist_sessions(&removed, RevocationReason::RefreshTokenReuse)?;
        }

        Ok(AuthError::InvalidRefreshToken)
    }

    fn refresh_failed(&self, user_id: Option<&str>, reason: &str, meta: &ClientMeta) {
        let mut record = AuditRecord::new(AuditAction::RefreshFailed)
            .details(json!({ "reason": reason }))
            .client(meta);
        if let Some(id) = user_id {
            record = record.user(id);
        }
        self.audit.log(record);
    }

    fn login_failed(&self, email: &str, user_id: Option<&str>, reason: &str, meta: &ClientMeta) -> AuthError {
        warn!("Failed login attempt ({})", reason);
        let mut record = AuditRecord::new(AuditAction::LoginFailed)
            .details(json!({ "email": email, "reason": reason }))
            .client(meta);
        if let Some(id) = user_id {
            record = record.user(id);
        }
        self.audit.log(record);
        AuthError::InvalidCredentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Severity;
    use crate::test_util::Harness;

    fn meta() -> ClientMeta {
        ClientMeta::new(Some("192.0.2.10"), Some("unit-test"))
    }

    fn seed_user(h: &Harness, email: &str, verified: bool) -> User {
        let hash = h.hasher().hash("Str0ng!Pass").unwrap();
        let mut user = User::new(email.to_string(), hash, "Alice".into(), "Smith".into(), h.clock.now());
        user.email_verified = verified;
        h.store.create_user(&user).unwrap();
        user
    }

    fn manager(h: &Harness) -> SessionManager {
        SessionManager::new(h.store.clone(), h.hasher(), h.audit.clone(), h.clock.clone(), &h.config.security)
    }

    #[test]
    fn test_login_issues_tokens() {
        let h = Harness::new();
        let user = seed_user(&h, "alice@example.com", true);
        let sessions = manager(&h);

        let pair = sessions.login("ALICE@example.com", "Str0ng!Pass", &meta()).unwrap();
        assert_eq!(pair.expires_in, 15 * 60);
        assert_eq!(pair.refresh_token.len(), 43);
        assert_eq!(pair.token_type, "Bearer");

        let context = sessions.authenticate(Some(&format!("Bearer {}", pair.access_token))).unwrap();
        assert_eq!(context.user_id, user.id);
        assert_eq!(context.session_id, pair.session_id);

        let stored = h.store.find_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(stored.last_login_at, Some(h.clock.now()));
        assert_eq!(h.audit_actions(), vec![AuditAction::UserLogin]);
    }

    #[test]
    fn test_login_failures_are_indistinguishable() {
        let h = Harness::new();
        let mut inactive = seed_user(&h, "bob@example.com", true);
        inactive.is_active = false;
        seed_user(&h, "carol@example.com", true);
        h.store.create_user(&User { email: "inactive@example.com".into(), id: "inactive".into(), ..inactive }).unwrap();
        let sessions = manager(&h);

        let unknown = sessions.login("nobody@example.com", "Str0ng!Pass", &meta()).unwrap_err();
        let wrong = sessions.login("carol@example.com", "Wr0ng!Pass", &meta()).unwrap_err();
        let disabled = sessions.login("inactive@example.com", "Str0ng!Pass", &meta()).unwrap_err();

        for err in [&unknown, &wrong, &disabled] {
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.public_message(), "Invalid email or password");
        }

        let entries = h.audit_entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.action == AuditAction::LoginFailed && e.severity == Severity::High));
    }

    #[test]
    fn test_unverified_login_when_required() {
        let h = Harness::new();
        seed_user(&h, "dave@example.com", false);

        let mut security = h.config.security.clone();
        security.require_verified_email = true;
        let strict = SessionManager::new(h.store.clone(), h.hasher(), h.audit.clone(), h.clock.clone(), &security);

        let err = strict.login("dave@example.com", "Str0ng!Pass", &meta()).unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));
        assert_eq!(err.status_code(), 403);

        // Permitted by default
        assert!(manager(&h).login("dave@example.com", "Str0ng!Pass", &meta()).is_ok());
    }

    #[test]
    fn test_refresh_rotates_token() {
        let h = Harness::new();
        seed_user(&h, "erin@example.com", true);
        let sessions = manager(&h);

        let first = sessions.login("erin@example.com", "Str0ng!Pass", &meta()).unwrap();
        h.clock.advance(Duration::minutes(5));
        let second = sessions.refresh(&first.refresh_token, &meta()).unwrap();

        assert_ne!(first.refresh_token, second.refresh_token);
        assert_ne!(first.access_token, second.access_token);
        assert_eq!(first.session_id, second.session_id);

        // The new pair keeps working
        let third = sessions.refresh(&second.refresh_token, &meta()).unwrap();
        assert!(sessions.authenticate(Some(&third.access_token)).is_some());
    }

    #[test]
    fn test_rotated_token_reuse_revokes_session() {
        let h = Harness::new();
        seed_user(&h, "frank@example.com", true);
        let sessions = manager(&h);

        let first = sessions.login("frank@example.com", "Str0ng!Pass", &meta()).unwrap();
        let second = sessions.refresh(&first.refresh_token, &meta()).unwrap();

        let err = sessions.refresh(&first.refresh_token, &meta()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));

        let reuse = h.audit_entries().into_iter()
            .find(|e| e.action == AuditAction::RefreshTokenReuse)
            .unwrap();
        assert_eq!(reuse.severity, Severity::Critical);

        // The whole session is gone, including the legitimate successor
        assert!(sessions.refresh(&second.refresh_token, &meta()).is_err());
        assert!(sessions.authenticate(Some(&second.access_token)).is_none());
        assert!(h.store.find_session(&first.session_id).unwrap().is_none());
    }

    #[test]
    fn test_reuse_without_revocation_keeps_session() {
        let h = Harness::new();
        seed_user(&h, "gina@example.com", true);
        let mut security = h.config.security.clone();
        security.revoke_session_on_refresh_reuse = false;
        let sessions = SessionManager::new(h.store.clone(), h.hasher(), h.audit.clone(), h.clock.clone(), &security);

        let first = sessions.login("gina@example.com", "Str0ng!Pass", &meta()).unwrap();
        let second = sessions.refresh(&first.refresh_token, &meta()).unwrap();

        assert!(sessions.refresh(&first.refresh_token, &meta()).is_err());
        assert!(sessions.refresh(&second.refresh_token, &meta()).is_ok());
    }

    #[test]
    fn test_expired_session_cannot_refresh() {
        let h = Harness::new();
        seed_user(&h, "hank@example.com", true);
        let sessions = manager(&h);

        let pair = sessions.login("hank@example.com", "Str0ng!Pass", &meta()).unwrap();
        h.clock.advance(Duration::days(7));

        let err = sessions.refresh(&pair.refresh_token, &meta()).unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        assert!(h.store.find_session(&pair.session_id).unwrap().is_none());
        assert!(h.audit_actions().contains(&AuditAction::SessionExpired));
    }

    #[test]
    fn test_access_token_expiry_follows_clock() {
        let h = Harness::new();
        seed_user(&h, "ivy@example.com", true);
        let sessions = manager(&h);

        let pair = sessions.login("ivy@example.com", "Str0ng!Pass", &meta()).unwrap();
        h.clock.advance(Duration::minutes(15));

        assert!(sessions.authenticate(Some(&pair.access_token)).is_none());
        assert!(matches!(sessions.require_auth(Some(&pair.access_token)), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn test_authenticate_fails_open() {
        let h = Harness::new();
        let sessions = manager(&h);

        assert!(sessions.authenticate(None).is_none());
        assert!(sessions.authenticate(Some("")).is_none());
        assert!(sessions.authenticate(Some("Bearer garbage")).is_none());
        assert!(matches!(sessions.require_auth(None), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn test_logout_blacklists_access_token() {
        let h = Harness::new();
        seed_user(&h, "jack@example.com", true);
        let sessions = manager(&h);

        let pair = sessions.login("jack@example.com", "Str0ng!Pass", &meta()).unwrap();
        let outcome = sessions.logout(&pair.session_id, false, &meta()).unwrap();
        assert_eq!(outcome.sessions_revoked, 1);

        // Still inside its natural lifetime, but rejected
        assert!(sessions.authenticate(Some(&pair.access_token)).is_none());
        assert!(sessions.refresh(&pair.refresh_token, &meta()).is_err());
        assert!(matches!(sessions.logout(&pair.session_id, false, &meta()), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn test_logout_all_devices() {
        let h = Harness::new();
        let user = seed_user(&h, "kate@example.com", true);
        let sessions = manager(&h);

        let pairs: Vec<TokenPair> = (0..3)
            .map(|_| sessions.login("kate@example.com", "Str0ng!Pass", &meta()).unwrap())
            .collect();

        let listed = sessions.list_sessions(&user.id, Some(&pairs[0].session_id)).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed.iter().filter(|s| s.current).count(), 1);

        let outcome = sessions.logout(&pairs[1].session_id, true, &meta()).unwrap();
        assert_eq!(outcome.sessions_revoked, 3);

        for pair in &pairs {
            assert!(sessions.authenticate(Some(&pair.access_token)).is_none());
            let entry = h.store.find_blacklist_entry(&jti_of(&sessions, pair), h.clock.now()).unwrap();
            assert!(entry.is_some());
        }
        assert!(sessions.list_sessions(&user.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_access_tokens_issued_before_refresh_end_with_session() {
        let h = Harness::new();
        seed_user(&h, "liam@example.com", true);
        let sessions = manager(&h);

        let first = sessions.login("liam@example.com", "Str0ng!Pass", &meta()).unwrap();
        h.clock.advance(Duration::minutes(1));
        let second = sessions.refresh(&first.refresh_token, &meta()).unwrap();
        assert!(sessions.authenticate(Some(&first.access_token)).is_some());

        sessions.logout(&first.session_id, false, &meta()).unwrap();

        assert!(sessions.authenticate(Some(&first.access_token)).is_none());
        assert!(sessions.authenticate(Some(&second.access_token)).is_none());
    }

    #[test]
    fn test_revoke_all_rejects_every_issued_access_token() {
        let h = Harness::new();
        let user = seed_user(&h, "mona@example.com", true);
        let sessions = manager(&h);

        let first = sessions.login("mona@example.com", "Str0ng!Pass", &meta()).unwrap();
        h.clock.advance(Duration::minutes(1));
        sessions.refresh(&first.refresh_token, &meta()).unwrap();

        assert_eq!(sessions.revoke_all_for_user(&user.id, RevocationReason::PasswordReset).unwrap(), 1);
        assert!(sessions.authenticate(Some(&first.access_token)).is_none());
    }

    #[test]
    fn test_reuse_detected_several_rotations_later() {
        let h = Harness::new();
        seed_user(&h, "nora@example.com", true);
        let sessions = manager(&h);

        let first = sessions.login("nora@example.com", "Str0ng!Pass", &meta()).unwrap();
        let second = sessions.refresh(&first.refresh_token, &meta()).unwrap();
        let third = sessions.refresh(&second.refresh_token, &meta()).unwrap();

        let err = sessions.refresh(&first.refresh_token, &meta()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
        assert!(h.audit_actions().contains(&AuditAction::RefreshTokenReuse));

        assert!(h.store.find_session(&first.session_id).unwrap().is_none());
        assert!(sessions.refresh(&third.refresh_token, &meta()).is_err());
        assert!(sessions.authenticate(Some(&third.access_token)).is_none());
    }

    fn jti_of(sessions: &SessionManager, pair: &TokenPair) -> String {
        sessions.issuer.validate(&pair.access_token, sessions.clock.now()).unwrap().jti
    }
}
