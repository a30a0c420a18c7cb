//! `mailbackup`: periodic backup of IMAP mailboxes to local storage.
//!
//! Every configured account is backed up concurrently: all folders are
//! walked, each message is decoded, its attachments are written below the
//! account's backup directory, and the run is exported as a CSV table and
//! a JSON document. The scheduler repeats this once per interval.

pub mod backup;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod sanitize;
pub mod source;
