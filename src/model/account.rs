//! Mailbox account identity and the directory naming derived from it.

use std::fmt;

use crate::sanitize::sanitize_path_component;

/// Prefix of every per-account backup directory.
pub const BACKUP_DIR_PREFIX: &str = "backup_";

/// One mailbox to back up.
///
/// Built once from configuration and never mutated; sessions only borrow it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountConfig {
    /// Full account address, also used as the login name.
    pub address: String,
    /// Login secret (password or app password).
    pub secret: String,
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (993 for IMAPS).
    pub port: u16,
}

impl AccountConfig {
    /// Build an account record.
    pub fn new(
        address: impl Into<String>,
        secret: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            address: address.into(),
            secret: secret.into(),
            host: host.into(),
            port,
        }
    }

    /// Text before the first `@`, or the whole address when there is none.
    pub fn local_part(&self) -> &str {
        self.address
            .split_once('@')
            .map_or(self.address.as_str(), |(local, _)| local)
    }

    /// Name of this account's backup directory: `backup_<local-part>`.
    pub fn backup_dir_name(&self) -> String {
        format!(
            "{BACKUP_DIR_PREFIX}{}",
            sanitize_path_component(self.local_part().trim())
        )
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
