//! Credential store boundary.
//!
//! Every mutation that guards a single-use or uniqueness invariant is a single
//! conditional statement, so two racing requests can never both win.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, OptionalExtension, Row};

use crate::database::models::{
    ExpiredKind, RevocationReason, Session, SessionRotation, TokenBlacklistEntry, User,
};
use crate::database::{fmt_ts, parse_opt_ts, parse_ts, Database};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations needed by the credential and session managers
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    fn find_user_by_id(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Insert a new user; a duplicate email yields `StoreError::Conflict`
    fn create_user(&self, user: &User) -> StoreResult<()>;

    /// Mark the owner of a live, unconsumed verification token as verified and
    /// clear the token. Returns the updated user, or `None` if nothing matched.
    fn consume_verification_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<User>>;

    /// Replace the verification token of a still-unverified user
    fn replace_verification_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Store a password reset token for an active user
    fn set_password_reset_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Consume a live reset token and install the new password hash in one write
    fn consume_password_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    fn record_login(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<()>;

    fn create_session(&self, session: &Session) -> StoreResult<()>;

    fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    fn find_session_by_refresh_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    /// Find the live session that once held `token_hash` and has since rotated it away
    fn find_session_by_retired_refresh_hash(&self, token_hash: &str) -> StoreResult<Option<Session>>;

    /// Swap the refresh token of a live session, only if `presented_hash` is
    /// still its current value, and retire the old hash. Returns whether the swap happened.
    fn rotate_session(
        &self,
        session_id: &str,
        presented_hash: &str,
        rotation: &SessionRotation,
    ) -> StoreResult<bool>;

    fn list_sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>>;

    /// Delete one session, returning the removed row
    fn delete_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Delete every session of a user, returning the removed rows
    fn delete_sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>>;

    /// Insert a revocation record; `false` if the token was already listed
    fn insert_blacklist_entry(&self, entry: &TokenBlacklistEntry) -> StoreResult<bool>;

    /// Find a blacklist entry that has not yet expired
    fn find_blacklist_entry(&self, token_id: &str, now: DateTime<Utc>) -> StoreResult<Option<TokenBlacklistEntry>>;

    /// Remove or clear records of `kind` that expired before `cutoff`
    fn delete_expired(&self, kind: ExpiredKind, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, email_verified, is_active,
    verification_token_hash, verification_token_expires_at, password_reset_token_hash,
    password_reset_expires_at, last_login_at, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, previous_refresh_token_hash,
    access_token_id, access_token_expires_at, expires_at, device_info, ip_address, user_agent,
    created_at, last_activity_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email_verified: row.get::<_, i32>(5)? != 0,
        is_active: row.get::<_, i32>(6)? != 0,
        verification_token_hash: row.get(7)?,
        verification_token_expires_at: parse_opt_ts(8, row.get(8)?)?,
        password_reset_token_hash: row.get(9)?,
        password_reset_expires_at: parse_opt_ts(10, row.get(10)?)?,
        last_login_at: parse_opt_ts(11, row.get(11)?)?,
        created_at: parse_ts(12, &row.get::<_, String>(12)?)?,
        updated_at: parse_ts(13, &row.get::<_, String>(13)?)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        refresh_token_hash: row.get(2)?,
        previous_refresh_token_hash: row.get(3)?,
        access_token_id: row.get(4)?,
        access_token_expires_at: parse_ts(5, &row.get::<_, String>(5)?)?,
        expires_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        device_info: row.get(7)?,
        ip_address: row.get(8)?,
        user_agent: row.get(9)?,
        created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        last_activity_at: parse_ts(11, &row.get::<_, String>(11)?)?,
    })
}

fn blacklist_from_row(row: &Row<'_>) -> rusqlite::Result<TokenBlacklistEntry> {
    let reason: String = row.get(4)?;
    let reason = RevocationReason::from_str(&reason).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4, rusqlite::types::Type::Text, Box::new(StoreError::Backend(e)))
    })?;

    Ok(TokenBlacklistEntry {
        id: row.get(0)?,
        token_id: row.get(1)?,
        user_id: row.get(2)?,
        expires_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        reason,
        created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
    })
}

/// `CredentialStore` backed by the pooled SQLite database
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: Database,
}

impl SqliteCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn find_user_where(&self, clause: &str, value: &str) -> StoreResult<Option<User>> {
        let conn = self.db.connection()?;
        let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, clause);
        let user = conn.query_row(&sql, params![value], user_from_row).optional()?;
        Ok(user)
    }

    fn find_session_where(&self, clause: &str, value: &str) -> StoreResult<Option<Session>> {
        let conn = self.db.connection()?;
        let sql = format!("SELECT {} FROM sessions WHERE {} = ?1", SESSION_COLUMNS, clause);
        let session = conn.query_row(&sql, params![value], session_from_row).optional()?;
        Ok(session)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user_where("email", &email.to_lowercase())
    }

    fn find_user_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.find_user_where("id", user_id)
    }

    fn create_user(&self, user: &User) -> StoreResult<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO users (
                id, email, password_hash, first_name, last_name,
                email_verified, is_active, verification_token_hash,
                verification_token_expires_at, password_reset_token_hash,
                password_reset_expires_at, last_login_at, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14
            )",
            params![
                user.id,
                user.email.to_lowercase(),
                user.password_hash,
                user.first_name,
                user.last_name,
                user.email_verified as i32,
                user.is_active as i32,
                user.verification_token_hash,
                user.verification_token_expires_at.as_ref().map(fmt_ts),
                user.password_reset_token_hash,
                user.password_reset_expires_at.as_ref().map(fmt_ts),
                user.last_login_at.as_ref().map(fmt_ts),
                fmt_ts(&user.created_at),
                fmt_ts(&user.updated_at),
            ],
        )?;

        debug!("Inserted user {}", user.id);
        Ok(())
    }

    fn consume_verification_token(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<Option<User>> {
        let conn = self.db.connection()?;
        let now = fmt_ts(&now);

        let user_id: Option<String> = conn.query_row(
            "UPDATE users SET
                email_verified = 1,
                verification_token_hash = NULL,
                verification_token_expires_at = NULL,
                updated_at = ?2
             WHERE verification_token_hash = ?1
               AND email_verified = 0
               AND verification_token_expires_at > ?2
             RETURNING id",
            params![token_hash, now],
            |row| row.get(0),
        ).optional()?;

        match user_id {
            Some(id) => {
                let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
                let user = conn.query_row(&sql, params![id], user_from_row).optional()?;
                Ok(user)
            }
            None => Ok(None),
        }
    }

    fn replace_verification_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.db.connection()?;
        let changed = conn.execute(
            "UPDATE users SET
                verification_token_hash = ?2,
                verification_token_expires_at = ?3,
                updated_at = ?4
             WHERE id = ?1 AND email_verified = 0",
            params![user_id, token_hash, fmt_ts(&expires_at), fmt_ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn set_password_reset_token(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let conn = self.db.connection()?;
        let changed = conn.execute(
            "UPDATE users SET
                password_reset_token_hash = ?2,
                password_reset_expires_at = ?3,
                updated_at = ?4
             WHERE id = ?1 AND is_active = 1",
            params![user_id, token_hash, fmt_ts(&expires_at), fmt_ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn consume_password_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let conn = self.db.connection()?;
        let now = fmt_ts(&now);

        let user_id: Option<String> = conn.query_row(
            "UPDATE users SET
                password_hash = ?2,
                password_reset_token_hash = NULL,
                password_reset_expires_at = NULL,
                updated_at = ?3
             WHERE password_reset_token_hash = ?1
               AND password_reset_expires_at > ?3
               AND is_active = 1
             RETURNING id",
            params![token_hash, new_password_hash, now],
            |row| row.get(0),
        ).optional()?;

        match user_id {
            Some(id) => {
                let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
                Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
            }
            None => Ok(None),
        }
    }

    fn record_login(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.db.connection()?;
        let now = fmt_ts(&now);
        conn.execute(
            "UPDATE users SET last_login_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![user_id, now],
        )?;
        Ok(())
    }

    fn create_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO sessions (
                id, user_id, refresh_token_hash, previous_refresh_token_hash,
                access_token_id, access_token_expires_at, expires_at,
                device_info, ip_address, user_agent, created_at, last_activity_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
            )",
            params![
                session.id,
                session.user_id,
                session.refresh_token_hash,
                session.previous_refresh_token_hash,
                session.access_token_id,
                fmt_ts(&session.access_token_expires_at),
                fmt_ts(&session.expires_at),
                session.device_info,
                session.ip_address,
                session.user_agent,
                fmt_ts(&session.created_at),
                fmt_ts(&session.last_activity_at),
            ],
        )?;

        debug!("Created session {} for user {}", session.id, session.user_id);
        Ok(())
    }

    fn find_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        self.find_session_where("id", session_id)
    }

    fn find_session_by_refresh_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        self.find_session_where("refresh_token_hash", token_hash)
    }

    fn find_session_by_retired_refresh_hash(&self, token_hash: &str) -> StoreResult<Option<Session>> {
        let conn = self.db.connection()?;
        let sql = format!(
            "SELECT {} FROM sessions
             WHERE id = (SELECT session_id FROM refresh_token_history WHERE token_hash = ?1)",
            SESSION_COLUMNS
        );
        let session = conn.query_row(&sql, params![token_hash], session_from_row).optional()?;
        Ok(session)
    }

    fn rotate_session(
        &self,
        session_id: &str,
        presented_hash: &str,
        rotation: &SessionRotation,
    ) -> StoreResult<bool> {
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;

        // previous_refresh_token_hash takes the pre-update value of refresh_token_hash
        let changed = tx.execute(
            "UPDATE sessions SET
                previous_refresh_token_hash = refresh_token_hash,
                refresh_token_hash = ?3,
                access_token_id = ?4,
                access_token_expires_at = ?5,
                expires_at = ?6,
                last_activity_at = ?7
             WHERE id = ?1
               AND refresh_token_hash = ?2
               AND expires_at > ?7",
            params![
                session_id,
                presented_hash,
                rotation.new_refresh_token_hash,
                rotation.access_token_id,
                fmt_ts(&rotation.access_token_expires_at),
                fmt_ts(&rotation.expires_at),
                fmt_ts(&rotation.last_activity_at),
            ],
        )?;
        if changed != 1 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO refresh_token_history (token_hash, session_id, rotated_at)
             VALUES (?1, ?2, ?3)",
            params![presented_hash, session_id, fmt_ts(&rotation.last_activity_at)],
        )?;
        tx.commit()?;

        Ok(true)
    }

    fn list_sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let conn = self.db.connection()?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], session_from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let conn = self.db.connection()?;
        let sql = format!("DELETE FROM sessions WHERE id = ?1 RETURNING {}", SESSION_COLUMNS);
        let session = conn.query_row(&sql, params![session_id], session_from_row).optional()?;
        Ok(session)
    }

    fn delete_sessions_for_user(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let conn = self.db.connection()?;
        let sql = format!("DELETE FROM sessions WHERE user_id = ?1 RETURNING {}", SESSION_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], session_from_row)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn insert_blacklist_entry(&self, entry: &TokenBlacklistEntry) -> StoreResult<bool> {
        let conn = self.db.connection()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO token_blacklist (
                id, token_id, user_id, expires_at, reason, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.token_id,
                entry.user_id,
                fmt_ts(&entry.expires_at),
                entry.reason.as_str(),
                fmt_ts(&entry.created_at),
            ],
        )?;
        Ok(changed == 1)
    }

    fn find_blacklist_entry(&self, token_id: &str, now: DateTime<Utc>) -> StoreResult<Option<TokenBlacklistEntry>> {
        let conn = self.db.connection()?;
        let entry = conn.query_row(
            "SELECT id, token_id, user_id, expires_at, reason, created_at
             FROM token_blacklist
             WHERE token_id = ?1 AND expires_at > ?2",
            params![token_id, fmt_ts(&now)],
            blacklist_from_row,
        ).optional()?;
        Ok(entry)
    }

    fn delete_expired(&self, kind: ExpiredKind, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.db.connection()?;
        let cutoff = fmt_ts(&cutoff);

        let sql = match kind {
            ExpiredKind::VerificationTokens => {
                "UPDATE users SET
                    verification_token_hash = NULL,
                    verification_token_expires_at = NULL,
                    updated_at = ?1
                 WHERE verification_token_expires_at IS NOT NULL
                   AND verification_token_expires_at < ?1"
            }
            ExpiredKind::PasswordResetTokens => {
                "UPDATE users SET
                    password_reset_token_hash = NULL,
                    password_reset_expires_at = NULL,
                    updated_at = ?1
                 WHERE password_reset_expires_at IS NOT NULL
                   AND password_reset_expires_at < ?1"
            }
            ExpiredKind::Sessions => "DELETE FROM sessions WHERE expires_at < ?1",
            ExpiredKind::BlacklistEntries => "DELETE FROM token_blacklist WHERE expires_at < ?1",
        };

        let affected = conn.execute(sql, params![cutoff])?;
        debug!("Expired {} {}", affected, kind.as_str());
        Ok(affected)
    }
}
