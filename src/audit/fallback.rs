use anyhow::{Context, Result};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::database::models::AuditLogEntry;

/// Last-resort destination for audit entries the store refused
#[cfg_attr(test, mockall::automock)]
pub trait FallbackSink: Send + Sync {
    fn write(&self, entry: &AuditLogEntry) -> Result<()>;
}

/// Appends entries as JSON lines to a local file
pub struct FileFallbackSink {
    path: PathBuf,
    // One writer at a time so lines never interleave
    lock: Mutex<()>,
}

impl FileFallbackSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry in the file, skipping lines that do not parse
    pub fn read_entries(&self) -> Result<Vec<AuditLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .context(format!("Failed to read fallback file: {}", self.path.display()))?;

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl FallbackSink for FileFallbackSink {
    fn write(&self, entry: &AuditLogEntry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).context("Failed to create audit fallback directory")?;
            }
        }

        let serialized = serde_json::to_string(entry).context("Failed to serialize audit event")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open audit fallback file: {}", self.path.display()))?;

        file.write_all(format!("{}\n", serialized).as_bytes())
            .context("Failed to write to audit fallback file")?;

        debug!("Audit event saved to fallback file: {}", self.path.display());
        Ok(())
    }
}
