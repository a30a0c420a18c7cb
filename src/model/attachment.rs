//! Attachment payloads as they leave the decoder.
//!
//! Payloads are transient: they live between decoding and storage and are
//! persisted only as files, never as structs.

/// One attachment candidate extracted from a message.
#[derive(Debug, Clone)]
pub struct AttachmentPayload {
    /// Filename declared by the sender, if any. Untrusted.
    pub declared_filename: Option<String>,

    /// MIME content type (e.g. `"application/pdf"`), for logging only.
    pub content_type: String,

    /// Transfer-decoded content. Empty when nothing could be decoded.
    pub data: Vec<u8>,
}
