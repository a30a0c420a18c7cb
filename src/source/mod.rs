//! Mail sources: the protocol seam the backup session talks to.
//!
//! - [`imap::ImapConnector`] speaks IMAP over TLS using the `imap` crate.
//! - [`memory::MemoryConnector`] serves scripted mailboxes from memory.

pub mod imap;
pub mod memory;

use crate::error::Result;

/// A folder as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Protocol-level name, passed back to [`MailClient::select`].
    pub name: String,
    /// Human-readable name (IMAP modified UTF-7 decoded).
    pub display_name: String,
    /// `false` for `\Noselect` containers that hold no messages.
    pub selectable: bool,
}

impl Folder {
    /// A selectable folder whose display name equals its protocol name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            selectable: true,
        }
    }
}

/// Opens connections to a mail server.
///
/// Shared read-only by every account session of a cycle.
pub trait MailConnector: Send + Sync {
    /// Open a transport-level connection (TCP + TLS); no login yet.
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailClient>>;
}

/// One connection to a mailbox, owned by exactly one session.
pub trait MailClient: Send {
    /// Log in. Must succeed before any other command.
    fn authenticate(&mut self, user: &str, secret: &str) -> Result<()>;

    /// All folders, in server listing order.
    fn list_folders(&mut self) -> Result<Vec<Folder>>;

    /// Select `folder` and return its message count.
    fn select(&mut self, folder: &str, read_only: bool) -> Result<u32>;

    /// Identifiers of every message in the selected folder, ascending.
    fn search_all(&mut self) -> Result<Vec<u32>>;

    /// Full raw RFC 5322 bytes of one message.
    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>>;

    /// End the session and release the connection.
    fn logout(&mut self) -> Result<()>;
}
