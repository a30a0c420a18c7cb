//! Store a message's attachments under its backup directory.
//!
//! Layout: `<backup_dir>/attachments/<message_id>/<sanitized filename>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use humansize::{format_size, BINARY};
use tracing::{debug, error, warn};

use crate::error::{BackupError, Result};
use crate::model::attachment::AttachmentPayload;
use crate::parser::header::decode_header_value;
use crate::sanitize::{deduplicate_path, sanitize_filename};

/// Name of the directory holding all per-message attachment directories.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Directory for one message's attachments.
pub fn attachment_dir(backup_dir: &Path, message_id: &str) -> PathBuf {
    backup_dir.join(ATTACHMENTS_DIR).join(message_id)
}

/// Write every attachment payload of one message to disk.
///
/// Returns the stored paths in payload order. A payload that cannot be
/// stored is logged and skipped; the remaining ones are still written.
pub fn extract(payloads: &[AttachmentPayload], backup_dir: &Path, message_id: &str) -> Vec<PathBuf> {
    let dir = attachment_dir(backup_dir, message_id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!(
            dir = %dir.display(),
            error = %e,
            "Could not create attachment directory; skipping attachments"
        );
        return Vec::new();
    }

    let mut paths = Vec::with_capacity(payloads.len());
    for payload in payloads {
        match store_attachment(payload, &dir, message_id) {
            Ok(path) => paths.push(path),
            Err(e) => warn!(message_id, error = %e, "Attachment skipped"),
        }
    }
    paths
}

/// Sanitize, deduplicate and write a single attachment into `dir`.
pub fn store_attachment(payload: &AttachmentPayload, dir: &Path, message_id: &str) -> Result<PathBuf> {
    let declared = payload
        .declared_filename
        .as_deref()
        .map(decode_header_value)
        .unwrap_or_default();
    let filename = sanitize_filename(&declared, message_id);

    if payload.data.is_empty() {
        return Err(BackupError::Attachment {
            filename,
            reason: "payload is empty or could not be decoded".into(),
        });
    }

    let path = deduplicate_path(dir, &filename);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| attachment_io_error(&filename, e))?;
    file.write_all(&payload.data)
        .map_err(|e| attachment_io_error(&filename, e))?;

    debug!(
        path = %path.display(),
        content_type = %payload.content_type,
        size = %format_size(payload.data.len(), BINARY),
        "Saved attachment"
    );
    Ok(path)
}

fn attachment_io_error(filename: &str, e: std::io::Error) -> BackupError {
    BackupError::Attachment {
        filename: filename.to_string(),
        reason: e.to_string(),
    }
}
