//! Message parsing: header decoding and MIME structure.

pub mod header;
pub mod mime;
