//! In-memory mail source with scripted mailboxes.
//!
//! Serves raw messages per account and folder, can simulate unreachable
//! hosts, rejected logins, failing fetches, dropped connections and network
//! latency, and counts connections and logouts. Used by the test-suite.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BackupError, Result};

use super::{Folder, MailClient, MailConnector};

/// One scripted message slot.
#[derive(Debug, Clone)]
pub enum MemoryMessage {
    /// Served as-is by `fetch_raw`.
    Raw(Vec<u8>),
    /// `fetch_raw` fails with this reason.
    FetchError(String),
    /// `fetch_raw` fails as if the server dropped the connection.
    ConnectionLost,
}

impl From<&[u8]> for MemoryMessage {
    fn from(raw: &[u8]) -> Self {
        Self::Raw(raw.to_vec())
    }
}

impl From<Vec<u8>> for MemoryMessage {
    fn from(raw: Vec<u8>) -> Self {
        Self::Raw(raw)
    }
}

/// Folders and messages of one account.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    folders: Vec<(Folder, Vec<MemoryMessage>)>,
    refused: HashSet<String>,
}

impl MemoryMailbox {
    /// An empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selectable folder holding `messages`.
    pub fn folder<M: Into<MemoryMessage>>(
        mut self,
        name: &str,
        messages: impl IntoIterator<Item = M>,
    ) -> Self {
        self.folders.push((
            Folder::new(name),
            messages.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Add a `\Noselect` container folder.
    pub fn noselect(mut self, name: &str) -> Self {
        let folder = Folder {
            selectable: false,
            ..Folder::new(name)
        };
        self.folders.push((folder, Vec::new()));
        self
    }

    /// Add a folder that is listed as selectable but refuses SELECT.
    pub fn unselectable(mut self, name: &str) -> Self {
        self.refused.insert(name.to_string());
        self.folders.push((Folder::new(name), Vec::new()));
        self
    }
}

/// Scripted connector; clones share mailboxes and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    accounts: Arc<HashMap<String, (String, MemoryMailbox)>>,
    unreachable: Arc<HashSet<String>>,
    latency: Duration,
    connections: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// A connector serving no accounts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `mailbox` to logins as `user` with `secret`.
    pub fn with_mailbox(mut self, user: &str, secret: &str, mailbox: MemoryMailbox) -> Self {
        Arc::make_mut(&mut self.accounts).insert(user.to_string(), (secret.to_string(), mailbox));
        self
    }

    /// Refuse connections to `host`.
    pub fn unreachable(mut self, host: &str) -> Self {
        Arc::make_mut(&mut self.unreachable).insert(host.to_string());
        self
    }

    /// Sleep this long on every fetch.
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Successful `connect` calls so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `logout` calls on authenticated clients so far.
    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

impl MailConnector for MemoryConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailClient>> {
        if self.unreachable.contains(host) {
            return Err(BackupError::Connection {
                host: host.to_string(),
                port,
                reason: "connection refused".into(),
            });
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryClient {
            connector: self.clone(),
            mailbox: None,
            selected: None,
        }))
    }
}

struct MemoryClient {
    connector: MemoryConnector,
    mailbox: Option<MemoryMailbox>,
    selected: Option<usize>,
}

impl MemoryClient {
    fn mailbox(&self, command: &str) -> Result<&MemoryMailbox> {
        self.mailbox
            .as_ref()
            .ok_or_else(|| BackupError::protocol(command, "not authenticated"))
    }

    fn selected_messages(&self, command: &str) -> Result<&[MemoryMessage]> {
        let mailbox = self.mailbox(command)?;
        let index = self
            .selected
            .ok_or_else(|| BackupError::protocol(command, "no folder selected"))?;
        Ok(&mailbox.folders[index].1)
    }
}

impl MailClient for MemoryClient {
    fn authenticate(&mut self, user: &str, secret: &str) -> Result<()> {
        match self.connector.accounts.get(user) {
            Some((expected, mailbox)) if expected == secret => {
                self.mailbox = Some(mailbox.clone());
                Ok(())
            }
            _ => Err(BackupError::Authentication {
                user: user.to_string(),
                reason: "invalid credentials".into(),
            }),
        }
    }

    fn list_folders(&mut self) -> Result<Vec<Folder>> {
        Ok(self
            .mailbox("LIST")?
            .folders
            .iter()
            .map(|(folder, _)| folder.clone())
            .collect())
    }

    fn select(&mut self, folder: &str, _read_only: bool) -> Result<u32> {
        let command = format!("SELECT {folder}");
        let mailbox = self.mailbox(&command)?;
        if mailbox.refused.contains(folder) {
            return Err(BackupError::protocol(&command, "NO [CANNOT] mailbox unavailable"));
        }
        let (index, messages) = mailbox
            .folders
            .iter()
            .enumerate()
            .find(|(_, (f, _))| f.name == folder && f.selectable)
            .map(|(i, (_, messages))| (i, messages.len()))
            .ok_or_else(|| BackupError::protocol(&command, "no such folder"))?;
        self.selected = Some(index);
        Ok(u32::try_from(messages).unwrap_or(u32::MAX))
    }

    fn search_all(&mut self) -> Result<Vec<u32>> {
        let count = self.selected_messages("SEARCH ALL")?.len();
        Ok((1..=count).filter_map(|i| u32::try_from(i).ok()).collect())
    }

    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        let command = format!("FETCH {id}");
        if !self.connector.latency.is_zero() {
            std::thread::sleep(self.connector.latency);
        }
        let messages = self.selected_messages(&command)?;
        let slot = (id as usize)
            .checked_sub(1)
            .and_then(|i| messages.get(i))
            .ok_or_else(|| BackupError::protocol(&command, "no such message"))?;
        match slot {
            MemoryMessage::Raw(raw) => Ok(raw.clone()),
            MemoryMessage::FetchError(reason) => Err(BackupError::protocol(&command, reason)),
            MemoryMessage::ConnectionLost => Err(BackupError::Connection {
                host: "memory".into(),
                port: 0,
                reason: "connection lost".into(),
            }),
        }
    }

    fn logout(&mut self) -> Result<()> {
        if self.mailbox.take().is_some() {
            self.connector.logouts.fetch_add(1, Ordering::SeqCst);
        }
        self.selected = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> MemoryConnector {
        MemoryConnector::new().with_mailbox(
            "a@example.com",
            "pw",
            MemoryMailbox::new()
                .folder("INBOX", [b"Subject: 1\n\nx".as_slice(), b"Subject: 2\n\ny".as_slice()])
                .noselect("[Gmail]")
                .folder("Empty", Vec::<Vec<u8>>::new()),
        )
    }

    #[test]
    fn test_full_conversation() {
        let memory = connector();
        let mut client = memory.connect("imap.example.com", 993).unwrap();
        client.authenticate("a@example.com", "pw").unwrap();

        let folders = client.list_folders().unwrap();
        assert_eq!(folders.len(), 3);
        assert!(!folders[1].selectable);

        assert_eq!(client.select("INBOX", true).unwrap(), 2);
        assert_eq!(client.search_all().unwrap(), vec![1, 2]);
        assert!(client.fetch_raw(2).unwrap().starts_with(b"Subject: 2"));
        assert!(client.fetch_raw(3).is_err());

        client.logout().unwrap();
        assert_eq!(memory.connection_count(), 1);
        assert_eq!(memory.logout_count(), 1);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut client = connector().connect("h", 993).unwrap();
        let err = client.authenticate("a@example.com", "nope").unwrap_err();
        assert!(matches!(err, BackupError::Authentication { .. }));
        assert!(client.list_folders().is_err());
    }

    #[test]
    fn test_unreachable_host() {
        let memory = connector().unreachable("down.example.com");
        assert!(memory.connect("down.example.com", 993).is_err());
        assert_eq!(memory.connection_count(), 0);
    }

    #[test]
    fn test_scripted_failures() {
        let memory = MemoryConnector::new().with_mailbox(
            "b@example.com",
            "pw",
            MemoryMailbox::new()
                .unselectable("Junk")
                .folder("INBOX", [MemoryMessage::ConnectionLost]),
        );
        let mut client = memory.connect("h", 993).unwrap();
        client.authenticate("b@example.com", "pw").unwrap();

        assert!(client.list_folders().unwrap()[0].selectable);
        assert!(client.select("Junk", true).is_err());
        client.select("INBOX", true).unwrap();
        let err = client.fetch_raw(1).unwrap_err();
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_noselect_folder_cannot_be_selected() {
        let mut client = connector().connect("h", 993).unwrap();
        client.authenticate("a@example.com", "pw").unwrap();
        assert!(client.select("[Gmail]", true).is_err());
    }
}
