//! Tabular export of a run's records.
//!
//! Output is UTF-8 with BOM so spreadsheet applications detect the encoding.

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{BackupError, Result};
use crate::model::mail::MailMessageRecord;

const COLUMNS: [&str; 14] = [
    "Message_ID",
    "Folder",
    "Date",
    "Date_UTC",
    "From",
    "To",
    "CC",
    "Subject",
    "Body",
    "Received",
    "Failed_Recipients",
    "Diagnostic_Code",
    "SMTP_Error_Code",
    "Attachments",
];

/// Write `records` as CSV to `output_path`, replacing any existing file.
pub fn write_tabular(records: &[MailMessageRecord], output_path: &Path) -> Result<()> {
    let io_err = |e| BackupError::io(output_path, e);
    let file = std::fs::File::create(output_path).map_err(io_err)?;
    let mut out = BufWriter::new(file);

    // UTF-8 BOM for Excel
    out.write_all(&[0xEF, 0xBB, 0xBF]).map_err(io_err)?;
    writeln!(out, "{}", COLUMNS.join(",")).map_err(io_err)?;

    for record in records {
        writeln!(out, "{}", csv_row(record)).map_err(io_err)?;
    }

    out.flush().map_err(io_err)
}

fn csv_row(record: &MailMessageRecord) -> String {
    let date_utc = record
        .date_utc
        .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let attachments = record
        .attachments
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let received = record.received_headers.join("\n");

    let fields = [
        record.message_id.as_str(),
        record.folder.as_str(),
        record.date.as_str(),
        date_utc.as_str(),
        record.from.as_str(),
        record.to.as_str(),
        record.cc.as_str(),
        record.subject.as_str(),
        record.body.as_str(),
        received.as_str(),
        record.failed_recipients.as_deref().unwrap_or(""),
        record.diagnostic_code.as_deref().unwrap_or(""),
        record.smtp_error_code.as_deref().unwrap_or(""),
        attachments.as_str(),
    ];

    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
