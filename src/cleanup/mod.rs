//! Periodic removal of expired credentials, sessions and audit entries.

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audit::{AuditLogger, AuditRecord};
use crate::clock::Clock;
use crate::database::models::{AuditAction, ExpiredKind};
use crate::database::CredentialStore;
use crate::security::rate_limit::RateLimiter;

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub verification_tokens: usize,
    pub password_reset_tokens: usize,
    pub blacklist_entries: usize,
    pub sessions: usize,
    pub audit_entries: usize,
    pub rate_limit_windows: usize,
    /// Steps that failed; the rest of the sweep still ran
    pub failed_steps: Vec<String>,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.verification_tokens
            + self.password_reset_tokens
            + self.blacklist_entries
            + self.sessions
            + self.audit_entries
            + self.rate_limit_windows
    }
}

pub struct CleanupSweep {
    store: Arc<dyn CredentialStore>,
    audit: Arc<AuditLogger>,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl CleanupSweep {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        audit: Arc<AuditLogger>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            rate_limiter,
            clock,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep. Returns `None` without doing anything if another
    /// sweep is still in progress.
    pub fn run_once(&self) -> Option<SweepReport> {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!("Cleanup sweep already running, skipping");
            return None;
        }

        let report = self.sweep();
        self.running.store(false, Ordering::Release);
        Some(report)
    }

    /// Whether a sweep is currently executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the sweep every `interval` on a background thread
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> std::io::Result<SweepHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sweep = Arc::clone(self);

        let thread = std::thread::Builder::new()
            .name("cleanup-sweep".to_string())
            .spawn(move || {
                info!("Cleanup sweep started, interval {:?}", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            sweep.run_once();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Cleanup sweep stopped");
            })?;

        Ok(SweepHandle { stop_tx, thread: Some(thread) })
    }

    fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let steps = [
            ExpiredKind::VerificationTokens,
            ExpiredKind::PasswordResetTokens,
            ExpiredKind::BlacklistEntries,
            ExpiredKind::Sessions,
        ];
        for kind in steps {
            match self.store.delete_expired(kind, now) {
                Ok(removed) => {
                    let slot = match kind {
                        ExpiredKind::VerificationTokens => &mut report.verification_tokens,
                        ExpiredKind::PasswordResetTokens => &mut report.password_reset_tokens,
                        ExpiredKind::BlacklistEntries => &mut report.blacklist_entries,
                        ExpiredKind::Sessions => &mut report.sessions,
                    };
                    *slot = removed;
                }
                Err(e) => {
                    error!("Cleanup of {} failed: {}", kind.as_str(), e);
                    report.failed_steps.push(kind.as_str().to_string());
                }
            }
        }

        match self.audit.prune() {
            Ok(removed) => report.audit_entries = removed,
            Err(e) => {
                error!("Audit log pruning failed: {:#}", e);
                report.failed_steps.push("audit_log".to_string());
            }
        }

        report.rate_limit_windows = self.rate_limiter.prune();

        let details = json!({
            "verificationTokens": report.verification_tokens,
            "passwordResetTokens": report.password_reset_tokens,
            "blacklistEntries": report.blacklist_entries,
            "sessions": report.sessions,
            "auditEntries": report.audit_entries,
            "rateLimitWindows": report.rate_limit_windows,
            "failedSteps": report.failed_steps,
        });

        if report.failed_steps.is_empty() {
            info!("Cleanup sweep removed {} record(s)", report.total_removed());
            self.audit.log(AuditRecord::new(AuditAction::CleanupCompleted).details(details));
        } else {
            warn!("Cleanup sweep finished with {} failed step(s)", report.failed_steps.len());
            self.audit.log(AuditRecord::new(AuditAction::CleanupFailed).details(details));
        }

        report
    }
}

/// Stops the background sweep when asked or when dropped
pub struct SweepHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the thread and wait for an in-flight sweep to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Block until the sweep thread exits on its own
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Cleanup sweep thread panicked");
            }
        }
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Cleanup sweep thread panicked");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
