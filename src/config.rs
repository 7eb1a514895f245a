//! Layered configuration for the connection fabric: endpoint and connection tunables loaded from
//! an INI file, or constructed directly in memory by a caller (tests, in particular).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// An opaque `(user_id, password)` pair supplied by the caller at Session-construction time.
/// This crate never sources credentials itself — from environment, file, or CLI — that is left
/// to the caller.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("password", &"*****")
            .finish()
    }
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

/// The four broker endpoints, read from the `[SOCKET]` section of the INI file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SocketConfig {
    pub host: String,
    pub port_demo: u16,
    pub port_demo_stream: u16,
    pub port_real: u16,
    pub port_real_stream: u16,
}

/// Connection tunables, read from the `[CONNECTION]` section of the INI file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Minimum spacing, in milliseconds, between successive sends on one channel.
    pub send_interval: u64,
    /// Global cap on Sessions + Stream Sessions held by a Pool Manager.
    pub max_connections: usize,
    /// Number of address-connect retries before a transport gives up.
    pub max_connection_fails: usize,
    /// Maximum chunk size, in bytes, for a single outbound write syscall.
    pub max_send_data: usize,
    /// Maximum number of bytes read per inbound recv syscall.
    pub max_receive_data: usize,
    /// Reaction time budget, in milliseconds, for an individual read/write operation.
    pub max_reaction_time: u64,
    /// Whether Sessions and Stream Sessions wrap their transport in TLS. Always `true` against
    /// the real broker; test tooling sets this to `false` to stand up a plain-TCP mock broker.
    #[serde(default = "defaults::encrypted")]
    pub encrypted: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            send_interval: defaults::send_interval_ms(),
            max_connections: defaults::max_connections(),
            max_connection_fails: defaults::max_connection_fails(),
            max_send_data: defaults::max_send_data(),
            max_receive_data: defaults::max_receive_data(),
            max_reaction_time: defaults::max_reaction_time_ms(),
            encrypted: defaults::encrypted(),
        }
    }
}

impl ConnectionConfig {
    /// The maximum number of concurrent stream subscriptions a single Stream Session may hold,
    /// derived from the send interval: `floor(1000 / send_interval_ms)`.
    pub fn max_streams_per_session(&self) -> usize {
        (1000 / self.send_interval.max(1)) as usize
    }
}

/// The complete configuration consumed by a Pool Manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub socket: SocketConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Config {
    /// Load a [`Config`] from an INI file with sections `SOCKET` and `CONNECTION`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let ini = ini::Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

        let socket_section = ini
            .section(Some("SOCKET"))
            .ok_or_else(|| Error::Config("missing [SOCKET] section".into()))?;
        let connection_section = ini.section(Some("CONNECTION"));

        let socket = SocketConfig {
            host: required(socket_section, "HOST")?,
            port_demo: required_parsed(socket_section, "PORT_DEMO")?,
            port_demo_stream: required_parsed(socket_section, "PORT_DEMO_STREAM")?,
            port_real: required_parsed(socket_section, "PORT_REAL")?,
            port_real_stream: required_parsed(socket_section, "PORT_REAL_STREAM")?,
        };

        let connection = match connection_section {
            Some(section) => ConnectionConfig {
                send_interval: optional_parsed(section, "SEND_INTERVAL", defaults::send_interval_ms())?,
                max_connections: optional_parsed(
                    section,
                    "MAX_CONNECTIONS",
                    defaults::max_connections(),
                )?,
                max_connection_fails: optional_parsed(
                    section,
                    "MAX_CONNECTION_FAILS",
                    defaults::max_connection_fails(),
                )?,
                max_send_data: optional_parsed(section, "MAX_SEND_DATA", defaults::max_send_data())?,
                max_receive_data: optional_parsed(
                    section,
                    "MAX_RECIEVE_DATA",
                    defaults::max_receive_data(),
                )?,
                max_reaction_time: optional_parsed(
                    section,
                    "MAX_REACTION_TIME",
                    defaults::max_reaction_time_ms(),
                )?,
                encrypted: optional_parsed(section, "ENCRYPTED", defaults::encrypted())?,
            },
            None => ConnectionConfig::default(),
        };

        Ok(Config { socket, connection })
    }
}

fn required(section: &ini::Properties, key: &str) -> Result<String> {
    section
        .get(key)
        .map(str::to_owned)
        .ok_or_else(|| Error::Config(format!("missing required key {}", key)))
}

fn required_parsed<T: std::str::FromStr>(section: &ini::Properties, key: &str) -> Result<T> {
    let raw = required(section, key)?;
    raw.parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, raw)))
}

fn optional_parsed<T: std::str::FromStr>(
    section: &ini::Properties,
    key: &str,
    default: T,
) -> Result<T> {
    match section.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}
