//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line argument
//! 2. `$MAILBACKUP_CONFIG` (environment variable)
//! 3. `~/.config/mailbackup/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailbackup\config.toml` (Windows)
//!
//! A file named by 1 or 2 must exist. Without any file the built-in
//! defaults apply, which contain no accounts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backup::{BackupOptions, ShutdownPolicy};
use crate::error::{BackupError, Result};
use crate::model::account::AccountConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MAILBACKUP_CONFIG";

/// Default IMAPS port.
pub const DEFAULT_PORT: u16 = 993;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Cycle scheduling.
    pub schedule: ScheduleConfig,
    /// Transport settings shared by all accounts.
    pub connection: ConnectionConfig,
    /// Mailboxes to back up.
    pub accounts: Vec<AccountEntry>,
    /// File this configuration was read from; `None` for built-in defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// General behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory for the per-account backup directories.
    pub output_dir: PathBuf,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for log files.
    pub log_dir: Option<PathBuf>,
}

/// Cycle scheduling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between two backup cycles.
    pub interval_minutes: u64,
    /// "drain" or "abort".
    pub shutdown: ShutdownPolicy,
}

/// Transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Accept self-signed or otherwise invalid TLS certificates.
    pub accept_invalid_certs: bool,
    /// Seconds to wait on connect and on every socket read or write.
    pub timeout_secs: u64,
}

/// One `[[accounts]]` table.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountEntry {
    pub address: String,
    /// Inline secret.
    #[serde(default)]
    pub secret: Option<String>,
    /// Name of an environment variable holding the secret.
    #[serde(default)]
    pub secret_env: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl std::fmt::Debug for AccountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountEntry")
            .field("address", &self.address)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_env", &self.secret_env)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            timeout_secs: 60,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 720,
            shutdown: ShutdownPolicy::Drain,
        }
    }
}

// ── Resolution / validation ─────────────────────────────────────

impl AccountEntry {
    /// Resolve the secret and build the immutable account record.
    pub fn resolve(&self) -> Result<AccountConfig> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(BackupError::Config("account with empty address".into()));
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(BackupError::Config(format!("account '{address}': empty host")));
        }
        if self.port == 0 {
            return Err(BackupError::Config(format!("account '{address}': port must be non-zero")));
        }

        let secret = match (&self.secret, &self.secret_env) {
            (Some(secret), None) => secret.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                BackupError::Config(format!(
                    "account '{address}': environment variable '{var}' is not set"
                ))
            })?,
            (Some(_), Some(_)) => {
                return Err(BackupError::Config(format!(
                    "account '{address}': set either 'secret' or 'secret_env', not both"
                )))
            }
            (None, None) => {
                return Err(BackupError::Config(format!("account '{address}': missing secret")))
            }
        };
        if secret.is_empty() {
            return Err(BackupError::Config(format!("account '{address}': empty secret")));
        }

        Ok(AccountConfig::new(address, secret, host, self.port))
    }
}

impl Config {
    /// Resolve every account, rejecting entries that would share a backup
    /// directory.
    pub fn resolve_accounts(&self) -> Result<Vec<AccountConfig>> {
        let accounts = self
            .accounts
            .iter()
            .map(AccountEntry::resolve)
            .collect::<Result<Vec<_>>>()?;

        let mut dirs: HashMap<String, &str> = HashMap::new();
        for account in &accounts {
            if let Some(other) = dirs.insert(account.backup_dir_name(), &account.address) {
                return Err(BackupError::Config(format!(
                    "accounts '{other}' and '{}' map to the same backup directory '{}'",
                    account.address,
                    account.backup_dir_name()
                )));
            }
        }
        Ok(accounts)
    }

    /// Interval between cycles.
    pub fn interval(&self) -> Result<Duration> {
        if self.schedule.interval_minutes == 0 {
            return Err(BackupError::Config(
                "schedule.interval_minutes must be at least 1".into(),
            ));
        }
        Ok(Duration::from_secs(self.schedule.interval_minutes.saturating_mul(60)))
    }

    /// Socket timeout for mail server connections.
    pub fn connect_timeout(&self) -> Result<Duration> {
        if self.connection.timeout_secs == 0 {
            return Err(BackupError::Config(
                "connection.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(Duration::from_secs(self.connection.timeout_secs))
    }

    /// Orchestrator options derived from this configuration.
    pub fn backup_options(&self) -> Result<BackupOptions> {
        Ok(BackupOptions {
            output_root: self.general.output_dir.clone(),
            interval: self.interval()?,
            shutdown: self.schedule.shutdown,
        })
    }

    /// Check everything that can be checked without connecting.
    pub fn validate(&self) -> Result<()> {
        self.interval()?;
        self.connect_timeout()?;
        self.resolve_accounts()?;
        Ok(())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Parse configuration text.
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| BackupError::Config(e.to_string()))
}

/// Load configuration.
///
/// `explicit` (or `$MAILBACKUP_CONFIG`) must point at a readable file;
/// the standard location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let path = match named {
        Some(path) => {
            if !path.is_file() {
                return Err(BackupError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            path
        }
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(Config::default()),
        },
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| BackupError::io(&path, e))?;
    let mut config = parse_config(&contents).map_err(|e| match e {
        BackupError::Config(msg) => BackupError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    config.source = Some(path);
    Ok(config)
}

/// Standard config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mailbackup").join("config.toml"))
}

/// Directory for log files.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailbackup")
}
