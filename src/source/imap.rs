//! IMAP over TLS, using the synchronous `imap` crate.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use crate::error::{BackupError, Result};

use super::{Folder, MailClient, MailConnector};

type TlsClient = imap::Client<TlsStream<TcpStream>>;
type TlsSession = imap::Session<TlsStream<TcpStream>>;

/// Socket timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connects to IMAPS servers (implicit TLS, usually port 993).
#[derive(Debug, Clone)]
pub struct ImapConnector {
    accept_invalid_certs: bool,
    timeout: Duration,
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ImapConnector {
    /// Create a connector that verifies server certificates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept self-signed or otherwise invalid certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Limit for connecting and for every socket read or write.
    ///
    /// A stalled server surfaces as a connection error after this long,
    /// which ends the session. A zero duration is ignored.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    fn open_tcp(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no address")
        }))
    }
}

impl MailConnector for ImapConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailClient>> {
        let connection_error = |reason: String| BackupError::Connection {
            host: host.to_string(),
            port,
            reason,
        };

        let tls = TlsConnector::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| connection_error(format!("TLS connector build failed: {e}")))?;

        let tcp = self
            .open_tcp(host, port)
            .map_err(|e| connection_error(e.to_string()))?;
        let stream = tls
            .connect(host, tcp)
            .map_err(|e| connection_error(format!("TLS handshake failed: {e}")))?;
        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| connection_error(format!("no greeting: {e}")))?;
        debug!(host, port, timeout = ?self.timeout, "IMAP connection established");

        Ok(Box::new(ImapClient {
            host: host.to_string(),
            port,
            state: ImapState::Connected(client),
        }))
    }
}

enum ImapState {
    Connected(TlsClient),
    Authenticated(TlsSession),
    Closed,
}

/// A single IMAP connection moving from connected to authenticated to closed.
pub struct ImapClient {
    host: String,
    port: u16,
    state: ImapState,
}

impl ImapClient {
    /// Socket failures and dropped connections are session-fatal; anything
    /// the server answered is a protocol error.
    fn command_error(&self, command: impl Into<String>, e: imap::Error) -> BackupError {
        match e {
            imap::Error::Io(_) | imap::Error::ConnectionLost | imap::Error::Tls(_) => {
                BackupError::Connection {
                    host: self.host.clone(),
                    port: self.port,
                    reason: format!("{}: {e}", command.into()),
                }
            }
            other => BackupError::protocol(command, other),
        }
    }

    fn session(&mut self, command: &str) -> Result<&mut TlsSession> {
        match &mut self.state {
            ImapState::Authenticated(session) => Ok(session),
            ImapState::Connected(_) => Err(BackupError::protocol(command, "not authenticated")),
            ImapState::Closed => Err(BackupError::protocol(command, "connection closed")),
        }
    }
}

impl MailClient for ImapClient {
    fn authenticate(&mut self, user: &str, secret: &str) -> Result<()> {
        match std::mem::replace(&mut self.state, ImapState::Closed) {
            ImapState::Connected(client) => match client.login(user, secret) {
                Ok(session) => {
                    self.state = ImapState::Authenticated(session);
                    Ok(())
                }
                Err((e, client)) => {
                    self.state = ImapState::Connected(client);
                    Err(BackupError::Authentication {
                        user: user.to_string(),
                        reason: e.to_string(),
                    })
                }
            },
            other => {
                self.state = other;
                Err(BackupError::protocol("LOGIN", "already authenticated or closed"))
            }
        }
    }

    fn list_folders(&mut self) -> Result<Vec<Folder>> {
        let listed = self.session("LIST")?.list(Some(""), Some("*"));
        let names = listed.map_err(|e| self.command_error("LIST", e))?;

        Ok(names
            .iter()
            .map(|name| Folder {
                name: name.name().to_string(),
                display_name: utf7_imap::decode_utf7_imap(name.name().to_string()),
                selectable: !name
                    .attributes()
                    .iter()
                    .any(|a| matches!(a, imap::types::NameAttribute::NoSelect)),
            })
            .collect())
    }

    fn select(&mut self, folder: &str, read_only: bool) -> Result<u32> {
        let session = self.session("SELECT")?;
        let selected = if read_only {
            session.examine(folder)
        } else {
            session.select(folder)
        };
        let mailbox = selected.map_err(|e| self.command_error(format!("SELECT {folder}"), e))?;
        Ok(mailbox.exists)
    }

    fn search_all(&mut self) -> Result<Vec<u32>> {
        let searched = self.session("SEARCH")?.search("ALL");
        let found = searched.map_err(|e| self.command_error("SEARCH ALL", e))?;
        let mut ids: Vec<u32> = found.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        let command = format!("FETCH {id}");
        let fetched = self.session(&command)?.fetch(id.to_string(), "RFC822");
        let fetches = fetched.map_err(|e| self.command_error(command.as_str(), e))?;

        fetches
            .iter()
            .find_map(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BackupError::protocol(command, "server returned no message body"))
    }

    fn logout(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, ImapState::Closed) {
            ImapState::Authenticated(mut session) => {
                session.logout().map_err(|e| self.command_error("LOGOUT", e))
            }
            ImapState::Connected(_) | ImapState::Closed => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default_and_override() {
        assert_eq!(ImapConnector::new().timeout, DEFAULT_TIMEOUT);
        let connector = ImapConnector::new().timeout(Duration::from_secs(5));
        assert_eq!(connector.timeout, Duration::from_secs(5));
        let connector = connector.timeout(Duration::ZERO);
        assert_eq!(connector.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_refused_connection_is_session_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = ImapConnector::new().timeout(Duration::from_secs(2));
        let err = match connector.connect("127.0.0.1", port) {
            Err(e) => e,
            Ok(_) => panic!("connected to a closed port"),
        };
        assert!(matches!(err, BackupError::Connection { .. }));
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let hold = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(3));
            drop(stream);
        });

        let connector = ImapConnector::new().timeout(Duration::from_millis(300));
        let started = std::time::Instant::now();
        let result = connector.connect("127.0.0.1", port);
        assert!(matches!(result, Err(BackupError::Connection { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
        hold.join().unwrap();
    }
}
