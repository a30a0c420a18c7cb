//! The per-message backup record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything kept about one backed-up message.
///
/// Created once per fetched message and immutable afterwards. The session
/// that produced it owns it until the run is exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessageRecord {
    /// Synthetic backup identifier (random + timestamp). Names the message's
    /// attachment directory; unrelated to the `Message-ID` header.
    pub message_id: String,

    /// Folder the message was fetched from (display name).
    pub folder: String,

    /// Decoded `Subject:`.
    pub subject: String,

    /// Decoded `From:`.
    pub from: String,

    /// Decoded `To:`.
    pub to: String,

    /// Decoded `Cc:`.
    pub cc: String,

    /// Raw `Received:` header values, in header order.
    pub received_headers: Vec<String>,

    /// Raw `Date:` header value.
    pub date: String,

    /// `Date:` parsed to UTC, when it could be parsed.
    pub date_utc: Option<DateTime<Utc>>,

    /// Plain-text body.
    pub body: String,

    /// `X-Failed-Recipients:`; `None` when the header is absent.
    pub failed_recipients: Option<String>,

    /// `Diagnostic-Code:`; `None` when the header is absent.
    pub diagnostic_code: Option<String>,

    /// `X-SMTP-Error:`; `None` when the header is absent.
    pub smtp_error_code: Option<String>,

    /// Stored attachment files, in message order.
    pub attachments: Vec<PathBuf>,
}
