//! Periodic, concurrent backup of every configured account.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{BackupError, Result};
use crate::model::account::AccountConfig;
use crate::source::MailConnector;

use super::progress::ProgressReporter;
use super::session::{AccountBackupSession, SessionOutcome, SessionReport};

/// Default pause between two cycles: 12 hours.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// What happens to running sessions when shutdown is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Let in-flight sessions finish and export before exiting.
    #[default]
    Drain,
    /// Stop sessions at the next folder or message boundary, without export.
    Abort,
}

impl FromStr for ShutdownPolicy {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "abort" => Ok(Self::Abort),
            other => Err(BackupError::Config(format!(
                "unknown shutdown policy '{other}' (expected 'drain' or 'abort')"
            ))),
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drain => "drain",
            Self::Abort => "abort",
        })
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Root under which `backup_<local-part>/` directories are created.
    pub output_root: PathBuf,
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    pub shutdown: ShutdownPolicy,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            interval: DEFAULT_INTERVAL,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

/// Result of one cycle across all accounts.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Reports of sessions that completed, in completion order.
    pub completed: Vec<SessionReport>,
    /// Sessions that aborted or panicked.
    pub failed: usize,
    /// Sessions stopped by a shutdown request.
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Total records stored across all completed sessions.
    pub fn records(&self) -> usize {
        self.completed.iter().map(|r| r.records).sum()
    }

    /// `true` when no session completed.
    pub fn all_failed(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Runs one backup session per account, concurrently, once per interval.
pub struct BackupOrchestrator {
    accounts: Arc<[AccountConfig]>,
    session: AccountBackupSession,
    options: BackupOptions,
}

impl BackupOrchestrator {
    /// Build an orchestrator. An empty account list is a configuration error.
    pub fn new(
        accounts: Vec<AccountConfig>,
        connector: Arc<dyn MailConnector>,
        options: BackupOptions,
    ) -> Result<Self> {
        if accounts.is_empty() {
            return Err(BackupError::Config("no accounts configured".into()));
        }
        let session = AccountBackupSession::new(connector, options.output_root.clone());
        Ok(Self {
            accounts: accounts.into(),
            session,
            options,
        })
    }

    /// Report per-folder progress of every session to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.session = self.session.with_progress(progress);
        self
    }

    pub fn accounts(&self) -> &[AccountConfig] {
        &self.accounts
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Back up every account once and wait for all sessions.
    ///
    /// Under [`ShutdownPolicy::Abort`] sessions observe `cancel`; under
    /// [`ShutdownPolicy::Drain`] they run to completion regardless.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let start = Instant::now();
        info!(accounts = self.accounts.len(), "Backup cycle started");

        let mut tasks = JoinSet::new();
        for account in self.accounts.iter().cloned() {
            let session = self.session.clone();
            let token = match self.options.shutdown {
                ShutdownPolicy::Abort => cancel.child_token(),
                ShutdownPolicy::Drain => CancellationToken::new(),
            };
            tasks.spawn_blocking(move || {
                let outcome = session.run(&account, &token);
                (account.address, outcome)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, SessionOutcome::Completed(session))) => report.completed.push(session),
                Ok((_, SessionOutcome::Cancelled)) => report.cancelled += 1,
                Ok((address, SessionOutcome::Aborted { .. })) => {
                    report.failed += 1;
                    info!(address = %address, "Account counted as failed for this cycle");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Account backup task crashed");
                }
            }
        }
        report.elapsed = start.elapsed();

        info!(
            completed = report.completed.len(),
            failed = report.failed,
            cancelled = report.cancelled,
            records = report.records(),
            elapsed = ?report.elapsed,
            "Backup cycle finished"
        );
        report
    }

    /// Run a cycle now, then one every interval until `cancel` fires.
    ///
    /// The wait between cycles ends immediately on cancellation. Returns the
    /// number of cycles run.
    pub async fn run_forever(&self, cancel: CancellationToken) -> usize {
        let mut cycles = 0;
        loop {
            self.run_cycle(&cancel).await;
            cycles += 1;
            if cancel.is_cancelled() {
                break;
            }

            info!(minutes = self.options.interval.as_secs() / 60, "Waiting for next cycle");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.interval) => {}
            }
        }
        info!(cycles, "Backup scheduler stopped");
        cycles
    }
}
