//! One account's backup: connect, walk every folder, store, export, log out.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BackupError, Result};
use crate::export::{attachment, export_run};
use crate::model::account::AccountConfig;
use crate::model::mail::MailMessageRecord;
use crate::model::message_id::MessageIdGenerator;
use crate::model::run::BackupRun;
use crate::parser::mime::decode;
use crate::source::{Folder, MailClient, MailConnector};

use super::progress::{NoProgress, ProgressReporter};

/// Lifecycle of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Selecting,
    Fetching,
    Exporting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Selecting => "selecting",
            Self::Fetching => "fetching",
            Self::Exporting => "exporting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Totals of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub address: String,
    pub backup_dir: PathBuf,
    /// Folders selected and searched successfully.
    pub folders: usize,
    /// Folders that could not be selected or searched.
    pub failed_folders: usize,
    /// Messages stored.
    pub records: usize,
    /// Messages skipped because they failed to fetch or decode.
    pub failed_messages: usize,
    /// Attachment files written.
    pub attachments: usize,
    /// Both export files were written.
    pub export_ok: bool,
}

/// How a session ended. Sessions never propagate errors.
#[derive(Debug)]
pub enum SessionOutcome {
    /// All folders were walked and the export was attempted.
    Completed(SessionReport),
    /// The session could not start or had to stop early.
    Aborted { error: BackupError },
    /// A shutdown request interrupted the session; no export was written.
    Cancelled,
}

impl SessionOutcome {
    /// `true` when the session walked every folder.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The report of a completed session.
    pub fn report(&self) -> Option<&SessionReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Backs up one account per call to [`AccountBackupSession::run`].
///
/// Holds no per-run state; every run opens its own connection and starts
/// from an empty record list.
#[derive(Clone)]
pub struct AccountBackupSession {
    connector: Arc<dyn MailConnector>,
    output_root: PathBuf,
    progress: Arc<dyn ProgressReporter>,
}

impl AccountBackupSession {
    /// Create a session writing below `output_root`.
    pub fn new(connector: Arc<dyn MailConnector>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            output_root: output_root.into(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Report per-folder progress to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Backup directory of `account` below this session's output root.
    pub fn backup_dir(&self, account: &AccountConfig) -> PathBuf {
        self.output_root.join(account.backup_dir_name())
    }

    /// Run a full backup of `account`.
    ///
    /// `cancel` is checked before each folder and each message. Once it
    /// fires the session logs out without exporting, so the previous
    /// snapshot on disk stays untouched.
    pub fn run(&self, account: &AccountConfig, cancel: &CancellationToken) -> SessionOutcome {
        let address = account.address.as_str();
        let mut state = SessionState::Disconnected;
        info!(address, host = %account.host, port = account.port, "Starting account backup");

        let mut client = match self.open(account, &mut state) {
            Ok(client) => client,
            Err(e) => {
                error!(address, error = %e, "Account backup aborted");
                return SessionOutcome::Aborted { error: e };
            }
        };

        let backup_dir = self.backup_dir(account);
        if let Err(e) = std::fs::create_dir_all(&backup_dir) {
            let error = BackupError::io(&backup_dir, e);
            error!(address, error = %error, "Cannot create backup directory");
            close(client.as_mut(), address, &mut state);
            return SessionOutcome::Aborted { error };
        }

        let mut run = BackupRun::new(address, backup_dir);
        let folders = match self.walk_folders(client.as_mut(), &mut run, &mut state, cancel) {
            Ok(folders) => folders,
            Err(BackupError::Cancelled) => {
                warn!(
                    address,
                    stored = run.records.len(),
                    "Shutdown requested; export skipped"
                );
                close(client.as_mut(), address, &mut state);
                return SessionOutcome::Cancelled;
            }
            Err(e) => {
                error!(address, error = %e, "Account backup aborted");
                close(client.as_mut(), address, &mut state);
                return SessionOutcome::Aborted { error: e };
            }
        };

        transition(&mut state, SessionState::Exporting, address);
        let export_ok = match export_run(&run) {
            Ok(_) => true,
            Err(e) => {
                error!(address, error = %e, "Export failed");
                false
            }
        };
        close(client.as_mut(), address, &mut state);

        let report = SessionReport {
            address: run.address.clone(),
            backup_dir: run.backup_dir.clone(),
            folders,
            failed_folders: run.failed_folders,
            records: run.records.len(),
            failed_messages: run.failed_messages,
            attachments: run.attachment_count(),
            export_ok,
        };
        info!(
            address,
            folders = report.folders,
            failed_folders = report.failed_folders,
            records = report.records,
            failed = report.failed_messages,
            attachments = report.attachments,
            "Account backup finished"
        );
        SessionOutcome::Completed(report)
    }

    fn open(
        &self,
        account: &AccountConfig,
        state: &mut SessionState,
    ) -> Result<Box<dyn MailClient>> {
        let mut client = self.connector.connect(&account.host, account.port)?;
        transition(state, SessionState::Connected, &account.address);
        client.authenticate(&account.address, &account.secret)?;
        transition(state, SessionState::Authenticated, &account.address);
        Ok(client)
    }

    /// Walk every selectable folder in listing order; returns how many
    /// folders were read.
    ///
    /// Folder and message failures are skipped unless they are
    /// session-fatal (a lost connection), which ends the walk.
    fn walk_folders(
        &self,
        client: &mut dyn MailClient,
        run: &mut BackupRun,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let folders = client.list_folders()?;
        debug!(address = %run.address, count = folders.len(), "Listed folders");

        let mut ids = MessageIdGenerator::new();
        let mut done = 0;
        for folder in folders.iter().filter(|f| f.selectable) {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            transition(state, SessionState::Selecting, &run.address);
            let messages = match select_all(client, folder) {
                Ok(messages) => messages,
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => {
                    warn!(address = %run.address, folder = %folder.display_name, error = %e, "Folder skipped");
                    run.failed_folders += 1;
                    continue;
                }
            };
            done += 1;
            if messages.is_empty() {
                debug!(address = %run.address, folder = %folder.display_name, "Folder is empty");
                continue;
            }

            transition(state, SessionState::Fetching, &run.address);
            self.fetch_folder(client, folder, &messages, &mut ids, run, cancel)?;
        }
        Ok(done)
    }

    fn fetch_folder(
        &self,
        client: &mut dyn MailClient,
        folder: &Folder,
        messages: &[u32],
        ids: &mut MessageIdGenerator,
        run: &mut BackupRun,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut progress =
            self.progress
                .folder_started(&run.address, &folder.display_name, messages.len() as u64);
        let before = run.records.len();

        for &id in messages {
            if cancel.is_cancelled() {
                progress.finish();
                return Err(BackupError::Cancelled);
            }
            match backup_message(client, folder, id, ids, run) {
                Ok(record) => run.push(record),
                Err(e) if e.is_session_fatal() => {
                    progress.finish();
                    return Err(e);
                }
                Err(e) => {
                    warn!(address = %run.address, folder = %folder.display_name, id, error = %e, "Message skipped");
                    run.failed_messages += 1;
                }
            }
            progress.advance();
        }
        progress.finish();

        info!(
            address = %run.address,
            folder = %folder.display_name,
            stored = run.records.len() - before,
            total = messages.len(),
            "Folder backed up"
        );
        Ok(())
    }
}

fn select_all(client: &mut dyn MailClient, folder: &Folder) -> Result<Vec<u32>> {
    let exists = client.select(&folder.name, true)?;
    if exists == 0 {
        return Ok(Vec::new());
    }
    client.search_all()
}

fn backup_message(
    client: &mut dyn MailClient,
    folder: &Folder,
    id: u32,
    ids: &mut MessageIdGenerator,
    run: &BackupRun,
) -> Result<MailMessageRecord> {
    let raw = client.fetch_raw(id)?;
    let message_id = ids.next_id();
    let decoded = decode(&raw)?;
    let paths = attachment::extract(&decoded.attachments, &run.backup_dir, &message_id);
    Ok(decoded.into_record(&folder.display_name, &message_id, paths))
}

fn close(client: &mut dyn MailClient, address: &str, state: &mut SessionState) {
    if let Err(e) = client.logout() {
        warn!(address, error = %e, "Logout failed");
    }
    transition(state, SessionState::Closed, address);
}

fn transition(state: &mut SessionState, next: SessionState, address: &str) {
    debug!(address, from = %state, to = %next, "Session state change");
    *state = next;
}
