//! Export of a finished run: attachment files, tabular and structured summaries.

pub mod attachment;
pub mod csv;
pub mod json;

use std::path::PathBuf;

use tracing::info;

use crate::error::{BackupError, Result};
use crate::model::run::BackupRun;

pub use self::csv::write_tabular;
pub use self::json::write_structured;

/// Tabular export file name inside each backup directory.
pub const TABULAR_FILE: &str = "emails.csv";
/// Structured export file name inside each backup directory.
pub const STRUCTURED_FILE: &str = "emails.json";

/// Paths written by [`export_run`].
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub tabular: PathBuf,
    pub structured: PathBuf,
}

/// Write both summaries of `run` into its backup directory.
///
/// Both writers are attempted even if the first one fails; the previous
/// files are overwritten with this run's full snapshot.
pub fn export_run(run: &BackupRun) -> Result<ExportSummary> {
    let tabular = run.backup_dir.join(TABULAR_FILE);
    let structured = run.backup_dir.join(STRUCTURED_FILE);

    let results = [
        write_tabular(&run.records, &tabular),
        write_structured(&run.records, &structured),
    ];
    let errors: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.err().map(|e| e.to_string()))
        .collect();
    if !errors.is_empty() {
        return Err(BackupError::Export(errors.join("; ")));
    }

    info!(
        address = %run.address,
        records = run.records.len(),
        dir = %run.backup_dir.display(),
        "Exported backup summaries"
    );
    Ok(ExportSummary {
        tabular,
        structured,
    })
}
