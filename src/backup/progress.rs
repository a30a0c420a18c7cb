//! Per-folder progress reporting.
//!
//! Sessions call into a shared [`ProgressReporter`]; the CLI renders it as
//! progress bars, tests and `--no-progress` use [`NoProgress`].

/// Creates one progress handle per folder being fetched.
pub trait ProgressReporter: Send + Sync {
    /// A folder of `account` with `total` messages is about to be fetched.
    fn folder_started(&self, account: &str, folder: &str, total: u64) -> Box<dyn FolderProgress>;
}

/// Progress of a single folder.
pub trait FolderProgress: Send {
    /// One message was processed (stored or skipped).
    fn advance(&mut self);

    /// The folder is done.
    fn finish(&mut self);
}

/// Discards all progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn folder_started(&self, _account: &str, _folder: &str, _total: u64) -> Box<dyn FolderProgress> {
        Box::new(NoProgress)
    }
}

impl FolderProgress for NoProgress {
    fn advance(&mut self) {}

    fn finish(&mut self) {}
}
