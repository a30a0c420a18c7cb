//! State accumulated by one account session during one cycle.

use std::path::PathBuf;

use super::mail::MailMessageRecord;

/// The records produced by one execution of an account session.
///
/// A fresh run is created for every cycle; nothing is merged with earlier
/// runs and the exports overwrite the previous snapshot.
#[derive(Debug, Clone)]
pub struct BackupRun {
    /// Account address the run belongs to.
    pub address: String,
    /// The account's backup directory.
    pub backup_dir: PathBuf,
    /// Successfully decoded messages, in folder then message listing order.
    pub records: Vec<MailMessageRecord>,
    /// Messages that failed to fetch or decode and were skipped.
    pub failed_messages: usize,
    /// Folders that could not be selected or searched.
    pub failed_folders: usize,
}

impl BackupRun {
    /// Start an empty run.
    pub fn new(address: impl Into<String>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            backup_dir: backup_dir.into(),
            records: Vec::new(),
            failed_messages: 0,
            failed_folders: 0,
        }
    }

    /// Append a record.
    pub fn push(&mut self, record: MailMessageRecord) {
        self.records.push(record);
    }

    /// Total number of stored attachment files.
    pub fn attachment_count(&self) -> usize {
        self.records.iter().map(|r| r.attachments.len()).sum()
    }
}
