use anyhow::{Result, Context};
use log::debug;
use rusqlite::Connection;

/// Create the database schema; the caller owns the transaction
pub fn create_schema(tx: &Connection) -> Result<()> {
    debug!("Creating database schema");

    // Emails are stored lowercase; NOCASE keeps the unique index case-insensitive as well
    tx.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL COLLATE NOCASE,
            password_hash TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email_verified INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            verification_token_hash TEXT UNIQUE,
            verification_token_expires_at TEXT,
            password_reset_token_hash TEXT UNIQUE,
            password_reset_expires_at TEXT,
            last_login_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    ).context("Failed to create users table")?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            refresh_token_hash TEXT UNIQUE NOT NULL,
            previous_refresh_token_hash TEXT,
            access_token_id TEXT NOT NULL,
            access_token_expires_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            device_info TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    ).context("Failed to create sessions table")?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS token_blacklist (
            id TEXT PRIMARY KEY,
            token_id TEXT UNIQUE NOT NULL,
            user_id TEXT,
            expires_at TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    ).context("Failed to create token_blacklist table")?;

    // Append-only; user_id carries no foreign key so failed logins for unknown users can be recorded
    tx.execute(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            user_id TEXT,
            severity TEXT NOT NULL,
            severity_rank INTEGER NOT NULL,
            details TEXT NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            timestamp TEXT NOT NULL
        )",
        [],
    ).context("Failed to create audit_logs table")?;

    // Create indices for faster lookups
    tx.execute("CREATE INDEX IF NOT EXISTS idx_users_verification_expiry ON users(verification_token_expires_at)", [])
        .context("Failed to create index on users.verification_token_expires_at")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)", [])
        .context("Failed to create index on sessions.user_id")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_sessions_previous_refresh ON sessions(previous_refresh_token_hash)", [])
        .context("Failed to create index on sessions.previous_refresh_token_hash")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)", [])
        .context("Failed to create index on sessions.expires_at")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_token_blacklist_expires_at ON token_blacklist(expires_at)", [])
        .context("Failed to create index on token_blacklist.expires_at")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id ON audit_logs(user_id)", [])
        .context("Failed to create index on audit_logs.user_id")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp)", [])
        .context("Failed to create index on audit_logs.timestamp")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action)", [])
        .context("Failed to create index on audit_logs.action")?;

    // Audit rows are never rewritten
    tx.execute(
        "CREATE TRIGGER IF NOT EXISTS audit_logs_no_update
        BEFORE UPDATE ON audit_logs
        BEGIN
            SELECT RAISE(ABORT, 'audit_logs is append-only');
        END;",
        [],
    ).context("Failed to create audit_logs_no_update trigger")?;

    debug!("Database schema created successfully");
    Ok(())
}

/// Rotated-away refresh token digests, kept for the life of their session
pub fn create_refresh_token_history(tx: &Connection) -> Result<()> {
    tx.execute(
        "CREATE TABLE IF NOT EXISTS refresh_token_history (
            token_hash TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            rotated_at TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        )",
        [],
    ).context("Failed to create refresh_token_history table")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_refresh_token_history_session ON refresh_token_history(session_id)", [])
        .context("Failed to create index on refresh_token_history.session_id")?;

    Ok(())
}
