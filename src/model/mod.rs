//! Core data model: accounts, backup records, attachment payloads and run state.

pub mod account;
pub mod attachment;
pub mod mail;
pub mod message_id;
pub mod run;
