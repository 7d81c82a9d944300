//! Store configuration.
//!
//! [`StoreConfig`] is what a host hands to [`crate::BackupStore::new`].
//! [`ConfigFile`] is its TOML form, used by the command-line tool.

use crate::{Result, StoreError};
use reqwest::Url;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Folder used when none is configured.
pub const DEFAULT_BACKUP_PATH: &str = "/HomeAssistant/Backups";
/// Environment variable consulted for the password by [`ConfigFile::into_store_config`].
pub const PASSWORD_ENV: &str = "DAV_BACKUP_PASSWORD";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LIST_CONCURRENCY: usize = 5;

/// Connection settings for one WebDAV remote.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Server URL, e.g. `https://cloud.example.com/` or `https://host/owncloud/`.
    pub base_url: String,
    /// Login name. Also used in the per-user DAV root.
    pub username: String,
    /// Password or app password.
    pub credential: SecretString,
    /// Folder below the DAV root that holds the backups.
    pub backup_path: String,
    /// Verify the server's TLS certificate.
    pub verify_tls: bool,
    /// Fixed DAV root path. Skips root discovery when set.
    pub dav_root: Option<String>,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Longest time a transfer may go without progress.
    ///
    /// Archive uploads and downloads are aborted only when no chunk moves for
    /// this long, so a large transfer may run for hours while data keeps
    /// flowing. PROPFIND, MKCOL, DELETE and sidecar requests are small and use
    /// it as their whole-request limit.
    pub stall_timeout: Duration,
    /// Directory for spooled uploads. Defaults to the system temp dir.
    pub spool_dir: Option<PathBuf>,
    /// How many sidecars are fetched in parallel while listing.
    pub list_concurrency: usize,
}

impl StoreConfig {
    /// Create a configuration with default folder, timeouts and TLS verification.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            credential: SecretString::new(credential.into()),
            backup_path: DEFAULT_BACKUP_PATH.to_string(),
            verify_tls: true,
            dav_root: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            spool_dir: None,
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
        }
    }

    pub fn with_backup_path(mut self, backup_path: impl Into<String>) -> Self {
        self.backup_path = backup_path.into();
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_dav_root(mut self, dav_root: impl Into<String>) -> Self {
        self.dav_root = Some(dav_root.into());
        self
    }

    pub fn with_spool_dir(mut self, spool_dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(spool_dir.into());
        self
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Check the configuration without touching the network.
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;

        if self.username.trim().is_empty() {
            return Err(StoreError::Config("username is required".into()));
        }
        if self.list_concurrency == 0 {
            return Err(StoreError::Config(
                "list_concurrency must be at least 1".into(),
            ));
        }
        if split_path(&self.backup_path).iter().any(|s| s == ".." || s == ".") {
            return Err(StoreError::Config(format!(
                "backup_path must not contain relative components: {}",
                self.backup_path
            )));
        }
        if let Some(root) = &self.dav_root {
            if split_path(root).iter().any(|s| s == ".." || s == ".") {
                return Err(StoreError::Config(format!(
                    "dav_root must not contain relative components: {}",
                    root
                )));
            }
        }
        Ok(())
    }

    /// The base URL, parsed and checked to be http(s).
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(self.base_url.trim())
            .map_err(|e| StoreError::Config(format!("invalid base_url: {}", e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(StoreError::Config(format!(
                    "base_url must be http or https, got {}",
                    other
                )))
            }
        }
        if url.cannot_be_a_base() {
            return Err(StoreError::Config(format!(
                "base_url cannot carry a path: {}",
                url
            )));
        }
        Ok(url)
    }

    /// Path segments of the backup folder below the DAV root.
    pub fn folder_segments(&self) -> Vec<String> {
        split_path(&self.backup_path)
    }
}

/// Split a slash-separated path into its non-empty segments.
pub(crate) fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// TOML representation of [`StoreConfig`].
///
/// ```toml
/// base_url = "https://cloud.example.com"
/// username = "alice"
/// backup_path = "/HomeAssistant/Backups"
/// verify_tls = true
/// ```
///
/// Not `Debug`: it may hold the plain-text password.
#[derive(Clone, Deserialize)]
pub struct ConfigFile {
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_backup_path")]
    pub backup_path: String,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default)]
    pub dav_root: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    #[serde(default = "default_list_concurrency")]
    pub list_concurrency: usize,
}

fn default_backup_path() -> String {
    DEFAULT_BACKUP_PATH.to_string()
}

fn default_verify_tls() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_stall_timeout() -> u64 {
    DEFAULT_STALL_TIMEOUT_SECS
}

fn default_list_concurrency() -> usize {
    DEFAULT_LIST_CONCURRENCY
}

impl ConfigFile {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Build a validated [`StoreConfig`].
    ///
    /// `password` takes precedence over the file's `password` key.
    pub fn into_store_config(self, password: Option<String>) -> Result<StoreConfig> {
        let credential = password.or(self.password).ok_or_else(|| {
            StoreError::Config(format!(
                "no password configured (set `password` or {})",
                PASSWORD_ENV
            ))
        })?;

        let config = StoreConfig {
            base_url: self.base_url,
            username: self.username,
            credential: SecretString::new(credential),
            backup_path: self.backup_path,
            verify_tls: self.verify_tls,
            dav_root: self.dav_root,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            spool_dir: self.spool_dir,
            list_concurrency: self.list_concurrency,
        };
        config.validate()?;
        Ok(config)
    }
}
