use anyhow::{Result, Context};
use log::{debug, info, warn};
use rusqlite::Connection;

use crate::database::schema;

// Database schema version
pub const CURRENT_VERSION: u32 = 2;

type MigrationFn = fn(&Connection) -> Result<()>;

/// Bring the database up to `CURRENT_VERSION`
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    debug!("Checking database version");

    let version = get_database_version(conn)?;

    if version == CURRENT_VERSION {
        debug!("Database schema is up to date (version {})", version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", version, CURRENT_VERSION);

    for v in version..CURRENT_VERSION {
        let migration_fn: MigrationFn = match v {
            0 => migrate_v0_to_v1,
            1 => migrate_v1_to_v2,
            _ => {
                warn!("No migration function found for version {}", v);
                continue;
            }
        };

        apply_step(conn, v, migration_fn)?;
    }

    info!("Database migration completed successfully to version {}", CURRENT_VERSION);
    Ok(())
}

/// Run one migration step and its version bump in a single transaction
fn apply_step(conn: &mut Connection, from: u32, migration_fn: MigrationFn) -> Result<()> {
    debug!("Running migration from version {} to {}", from, from + 1);

    let tx = conn.transaction().context("Failed to start transaction for migration")?;
    migration_fn(&tx).context(format!("Failed to migrate from version {} to {}", from, from + 1))?;
    set_database_version(&tx, from + 1)?;
    tx.commit().context("Failed to commit migration transaction")?;

    Ok(())
}

/// Get the current database version
pub fn get_database_version(conn: &Connection) -> Result<u32> {
    let version_table_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='database_version')",
        [],
        |row| row.get(0),
    ).context("Failed to inspect sqlite_master")?;

    // A fresh database starts at version 0
    if !version_table_exists {
        conn.execute(
            "CREATE TABLE database_version (version INTEGER NOT NULL)",
            [],
        ).context("Failed to create database_version table")?;

        conn.execute(
            "INSERT INTO database_version (version) VALUES (0)",
            [],
        ).context("Failed to initialize database version")?;

        return Ok(0);
    }

    let version: u32 = conn.query_row(
        "SELECT version FROM database_version",
        [],
        |row| row.get(0),
    ).context("Failed to get database version")?;

    Ok(version)
}

fn set_database_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "UPDATE database_version SET version = ?",
        [version],
    ).context("Failed to update database version")?;

    Ok(())
}

/// Version 1: users, sessions, token blacklist and audit log
fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    schema::create_schema(conn)
}

/// Version 2: every refresh token a session has rotated away
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    schema::create_refresh_token_history(conn)
}
