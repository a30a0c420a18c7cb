//! Structured (JSON) export of a run's records.

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{BackupError, Result};
use crate::model::mail::MailMessageRecord;

/// Write `records` as a pretty-printed JSON array, replacing any existing file.
///
/// Non-ASCII text is written as-is (UTF-8), not escaped.
pub fn write_structured(records: &[MailMessageRecord], output_path: &Path) -> Result<()> {
    let file = std::fs::File::create(output_path).map_err(|e| BackupError::io(output_path, e))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, records)
        .map_err(|e| BackupError::Export(format!("{}: {e}", output_path.display())))?;
    out.write_all(b"\n")
        .and_then(|()| out.flush())
        .map_err(|e| BackupError::io(output_path, e))
}
