use anyhow::{Result, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use log::{info, debug};

use crate::config::DatabaseConfig;
use crate::error::StoreError;

pub mod migrations;
pub mod models;
mod schema;
pub mod store;


pub use store::{CredentialStore, SqliteCredentialStore};
#[cfg(test)]
pub use store::MockCredentialStore;

/// Pooled SQLite handle shared by the credential store and the audit repository
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating if needed) the database file and run pending migrations
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let db_path = &config.path;

        // Create directory if it doesn't exist
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(busy_timeout)
            .build(manager)
            .context("Failed to create database connection pool")?;

        let mut conn = pool.get().context("Failed to get a database connection")?;
        migrations::run_migrations(&mut conn).context("Failed to migrate database schema")?;

        info!("Database ready at {}", db_path);
        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        let conn = self.pool.get()?;
        debug!("Checked out database connection");
        Ok(conn)
    }
}

/// Fixed-width UTC timestamp so that SQL string comparison orders by time
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by `fmt_ts`
pub fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Parse an optional timestamp column
pub fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}
