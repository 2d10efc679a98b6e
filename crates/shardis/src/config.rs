//! Router configuration.
//!
//! A [`ShardConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! servers = ["10.0.0.1:6379", "10.0.0.2:6379"]
//! database = 2
//! password = "hunter2"
//!
//! [client-options]
//! connect-timeout-ms = 2000
//! command-timeout-ms = 500
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShardError;

/// Connection settings forwarded verbatim to every backend connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientOptions {
    /// Maximum time to establish the TCP connection.
    pub connect_timeout_ms: u64,
    /// Maximum time to wait for a reply. `None` waits indefinitely.
    pub command_timeout_ms: Option<u64>,
    /// Disable Nagle's algorithm on backend sockets.
    pub nodelay: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            command_timeout_ms: None,
            nodelay: true,
        }
    }
}

impl ClientOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level router configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShardConfig {
    /// Backend addresses in `host:port` form. Every address gets equal
    /// weight on the ring.
    pub servers: Vec<String>,

    /// Logical database selected on every connection after connect.
    #[serde(default)]
    pub database: Option<u32>,

    /// Password sent with AUTH on every connection.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub client_options: ClientOptions,
}

impl ShardConfig {
    /// Creates a config for the given servers with default options.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, db: u32) -> Self {
        self.database = Some(db);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(input: &str) -> Result<Self, ShardError> {
        let cfg: ShardConfig =
            toml::from_str(input).map_err(|e| ShardError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ShardError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ShardError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Serializes the config back to TOML.
    pub fn to_toml(&self) -> Result<String, ShardError> {
        toml::to_string_pretty(self).map_err(|e| ShardError::Config(e.to_string()))
    }

    /// Checks the server list: non-empty, every entry `host:port`, no
    /// duplicates.
    pub fn validate(&self) -> Result<(), ShardError> {
        if self.servers.is_empty() {
            return Err(ShardError::Config("servers must not be empty".into()));
        }

        let mut seen = HashSet::with_capacity(self.servers.len());
        for server in &self.servers {
            validate_address(server)?;
            if !seen.insert(server.as_str()) {
                return Err(ShardError::Config(format!(
                    "server '{server}' is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Accepts `host:port` and `[v6]:port`.
fn validate_address(addr: &str) -> Result<(), ShardError> {
    let malformed = || ShardError::Config(format!("server '{addr}' is not in host:port form"));

    let (host, port) = addr.rsplit_once(':').ok_or_else(malformed)?;
    if host.is_empty() || host.trim() != host {
        return Err(malformed());
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(malformed()),
    }
}
