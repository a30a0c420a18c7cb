//! MIME message decoding: header fields, plain-text body and attachment payloads.

use std::path::PathBuf;

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::model::attachment::AttachmentPayload;
use crate::model::mail::MailMessageRecord;

use super::header::{decode_header_value, parse_date, HeaderMap};

/// A message decoded from raw bytes, before its attachments are stored.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// Decoded `Subject:`.
    pub subject: String,
    /// Decoded `From:`.
    pub from: String,
    /// Decoded `To:`.
    pub to: String,
    /// Decoded `Cc:`.
    pub cc: String,
    /// Raw `Received:` values.
    pub received_headers: Vec<String>,
    /// Raw `Date:` value.
    pub date: String,
    /// Plain-text body (empty when the message has none).
    pub body: String,
    /// `X-Failed-Recipients:`, absent → `None`.
    pub failed_recipients: Option<String>,
    /// `Diagnostic-Code:`, absent → `None`.
    pub diagnostic_code: Option<String>,
    /// `X-SMTP-Error:`, absent → `None`.
    pub smtp_error_code: Option<String>,
    /// Attachment candidates in message order.
    pub attachments: Vec<AttachmentPayload>,
}

impl DecodedMessage {
    /// Assemble the final record once attachments are stored.
    pub fn into_record(
        self,
        folder: &str,
        message_id: &str,
        attachment_paths: Vec<PathBuf>,
    ) -> MailMessageRecord {
        MailMessageRecord {
            message_id: message_id.to_string(),
            folder: folder.to_string(),
            date_utc: parse_date(&self.date),
            subject: self.subject,
            from: self.from,
            to: self.to,
            cc: self.cc,
            received_headers: self.received_headers,
            date: self.date,
            body: self.body,
            failed_recipients: self.failed_recipients,
            diagnostic_code: self.diagnostic_code,
            smtp_error_code: self.smtp_error_code,
            attachments: attachment_paths,
        }
    }
}

/// Decode a raw RFC 5322 message.
///
/// Per-field problems never fail the message: undecodable headers keep
/// their raw value and bodies are decoded with replacement characters.
/// Only a byte stream the MIME parser rejects is a [`BackupError::Decode`].
pub fn decode(raw_message: &[u8]) -> Result<DecodedMessage> {
    if raw_message.iter().all(u8::is_ascii_whitespace) {
        return Err(BackupError::Decode("message is empty".into()));
    }

    let parsed = MessageParser::default()
        .parse(raw_message)
        .ok_or_else(|| BackupError::Decode("not a parsable RFC 5322 message".into()))?;

    let headers = HeaderMap::from_message(raw_message);
    let decoded_field = |name: &str| headers.get(name).map(decode_header_value).unwrap_or_default();
    let raw_field = |name: &str| headers.get(name).map(|v| v.trim().to_string());

    let body = extract_body(&parsed.parts);
    let attachments = collect_attachments(&parsed.parts);
    debug!(
        parts = parsed.parts.len(),
        attachments = attachments.len(),
        "Decoded message"
    );

    Ok(DecodedMessage {
        subject: decoded_field("subject"),
        from: decoded_field("from"),
        to: decoded_field("to"),
        cc: decoded_field("cc"),
        received_headers: headers
            .get_all("received")
            .into_iter()
            .map(str::to_string)
            .collect(),
        date: raw_field("date").unwrap_or_default(),
        body,
        failed_recipients: raw_field("x-failed-recipients"),
        diagnostic_code: raw_field("diagnostic-code"),
        smtp_error_code: raw_field("x-smtp-error"),
        attachments,
    })
}

/// Body selection.
///
/// Multipart: the first `text/plain` part in walk order, or empty.
/// Otherwise: the single payload, whatever its type.
fn extract_body(parts: &[MessagePart<'_>]) -> String {
    let Some(root) = parts.first() else {
        return String::new();
    };

    if !is_container(root) {
        return part_text(root);
    }

    parts
        .iter()
        .find(|part| !is_container(part) && is_plain_text(part))
        .map(part_text)
        .unwrap_or_default()
}

/// Every non-container part that is declared an attachment or carries a filename.
fn collect_attachments(parts: &[MessagePart<'_>]) -> Vec<AttachmentPayload> {
    parts
        .iter()
        .filter(|part| !is_container(part))
        .filter(|part| is_attachment_disposition(part) || part.attachment_name().is_some())
        .map(|part| AttachmentPayload {
            declared_filename: part.attachment_name().map(str::to_string),
            content_type: content_type_of(part),
            data: part.contents().to_vec(),
        })
        .collect()
}

fn is_container(part: &MessagePart<'_>) -> bool {
    matches!(part.body, PartType::Multipart(_))
}

/// A part without `Content-Type` defaults to `text/plain` (RFC 2045 §5.2).
fn is_plain_text(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

fn is_attachment_disposition(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

fn content_type_of(part: &MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Text of a leaf part; binary payloads are decoded as UTF-8 with replacement.
fn part_text(part: &MessagePart<'_>) -> String {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Multipart(_) => String::new(),
        _ => String::from_utf8_lossy(part.contents()).into_owned(),
    }
}
