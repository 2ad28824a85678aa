//! Configuration system for the `StompChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/stompchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};

use stompchat_proto::destination::{RoomId, SessionScope};

use crate::auth::{AuthContext, Credentials};
use crate::connection::{self, ConnectionConfig};
use crate::pagination;

/// Whether `fmt` parses as a chrono strftime string.
fn is_valid_time_format(fmt: &str) -> bool {
    !StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The broker URL is not a `ws://` or `wss://` URL.
    #[error("invalid broker url {0:?}: expected ws:// or wss://")]
    InvalidBrokerUrl(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    broker: BrokerFileConfig,
    history: HistoryFileConfig,
    session: SessionFileConfig,
    auth: AuthFileConfig,
    reconnect: ReconnectFileConfig,
    display: DisplayFileConfig,
}

/// `[broker]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BrokerFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    receipt_timeout_secs: Option<u64>,
    command_buffer: Option<usize>,
}

/// `[history]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    room: Option<String>,
    user_id: Option<String>,
}

/// `[auth]` section of the config file.
#[derive(Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl std::fmt::Debug for AuthFileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFileConfig")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

/// `[display]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DisplayFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnect behaviour of the CLI after a session drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a drop; 0 disables reconnecting.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any delay.
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based), doubling each time.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Broker --
    /// Broker WebSocket URL.
    pub broker_url: String,
    /// Timeout for WebSocket upgrade plus STOMP handshake.
    pub connect_timeout: Duration,
    /// Wait for the DISCONNECT receipt.
    pub receipt_timeout: Duration,
    /// Capacity of each session's command queue.
    pub command_buffer: usize,

    // -- History --
    /// Base URL of the history REST endpoints; derived from the broker URL
    /// when unset.
    pub history_base_url: Option<String>,
    /// Timeout for one pagination request.
    pub request_timeout: Duration,

    // -- Session --
    /// Room to join; the lobby when unset.
    pub room: Option<String>,
    /// Logged-in member id.
    pub user_id: Option<String>,
    /// Tokens for the logged-in member.
    pub credentials: Option<Credentials>,

    // -- Reconnect --
    /// Reconnect policy of the CLI.
    pub reconnect: ReconnectPolicy,

    // -- Display --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: connection::DEFAULT_ENDPOINT.to_string(),
            connect_timeout: connection::DEFAULT_CONNECT_TIMEOUT,
            receipt_timeout: connection::DEFAULT_RECEIPT_TIMEOUT,
            command_buffer: connection::DEFAULT_COMMAND_BUFFER,
            history_base_url: None,
            request_timeout: pagination::DEFAULT_REQUEST_TIMEOUT,
            room: None,
            user_id: None,
            credentials: None,
            reconnect: ReconnectPolicy::default(),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        let access_token = cli
            .access_token
            .clone()
            .or_else(|| file.auth.access_token.clone());
        let refresh_token = cli
            .refresh_token
            .clone()
            .or_else(|| file.auth.refresh_token.clone());

        Self {
            broker_url: cli
                .url
                .clone()
                .or_else(|| file.broker.url.clone())
                .unwrap_or(defaults.broker_url),
            connect_timeout: file
                .broker
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            receipt_timeout: file
                .broker
                .receipt_timeout_secs
                .map_or(defaults.receipt_timeout, Duration::from_secs),
            command_buffer: file
                .broker
                .command_buffer
                .unwrap_or(defaults.command_buffer),
            history_base_url: cli
                .history_url
                .clone()
                .or_else(|| file.history.base_url.clone()),
            request_timeout: file
                .history
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            room: cli.room.clone().or_else(|| file.session.room.clone()),
            user_id: cli.user.clone().or_else(|| file.session.user_id.clone()),
            credentials: access_token.map(|token| Credentials::new(token, refresh_token)),
            reconnect: ReconnectPolicy {
                max_attempts: cli
                    .reconnect_attempts
                    .or(file.reconnect.max_attempts)
                    .unwrap_or(defaults.reconnect.max_attempts),
                initial_backoff: file
                    .reconnect
                    .initial_backoff_ms
                    .map_or(defaults.reconnect.initial_backoff, Duration::from_millis),
                max_backoff: file
                    .reconnect
                    .max_backoff_ms
                    .map_or(defaults.reconnect.max_backoff, Duration::from_millis),
            },
            timestamp_format: file
                .display
                .timestamp_format
                .clone()
                .filter(|fmt| {
                    let valid = is_valid_time_format(fmt);
                    if !valid {
                        tracing::warn!(format = %fmt, "invalid timestamp_format, using default");
                    }
                    valid
                })
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Connection settings for [`crate::connection::ConnectionManager`].
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.broker_url.clone(),
            connect_timeout: self.connect_timeout,
            receipt_timeout: self.receipt_timeout,
            command_buffer: self.command_buffer,
        }
    }

    /// The scope to activate: the configured room, or the lobby.
    #[must_use]
    pub fn scope(&self) -> SessionScope {
        match self.room.as_deref() {
            Some(room) if !room.is_empty() => SessionScope::Room(RoomId::new(room)),
            _ => SessionScope::Lobby,
        }
    }

    /// Authentication context: logged in only when both a member id and an
    /// access token are configured.
    #[must_use]
    pub fn auth(&self) -> AuthContext {
        match (&self.user_id, &self.credentials) {
            (Some(user), Some(credentials)) => AuthContext::user(user.clone(), credentials.clone()),
            (Some(user), None) => {
                tracing::warn!(user = %user, "member id without access token, connecting anonymously");
                AuthContext::Anonymous
            }
            _ => AuthContext::Anonymous,
        }
    }

    /// Base URL of the history backend.
    ///
    /// Defaults to the broker's origin with `ws`/`wss` mapped to
    /// `http`/`https`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBrokerUrl`] if no base URL is
    /// configured and the broker URL cannot be mapped.
    pub fn history_base(&self) -> Result<String, ConfigError> {
        if let Some(base) = &self.history_base_url {
            return Ok(base.clone());
        }
        let invalid = || ConfigError::InvalidBrokerUrl(self.broker_url.clone());
        let url = url::Url::parse(&self.broker_url).map_err(|_| invalid())?;
        let scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            _ => return Err(invalid()),
        };
        let host = url.host_str().ok_or_else(invalid)?;
        Ok(match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Line-mode STOMP chat client")]
pub struct CliArgs {
    /// WebSocket URL of the STOMP broker.
    #[arg(long, env = "STOMPCHAT_URL")]
    pub url: Option<String>,

    /// Base URL of the history REST endpoints.
    #[arg(long, env = "STOMPCHAT_HISTORY_URL")]
    pub history_url: Option<String>,

    /// Room to join instead of the lobby.
    #[arg(long)]
    pub room: Option<String>,

    /// Logged-in member id.
    #[arg(long, env = "STOMPCHAT_USER")]
    pub user: Option<String>,

    /// Access token for the logged-in member.
    #[arg(long, env = "STOMPCHAT_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Refresh token for the logged-in member.
    #[arg(long, env = "STOMPCHAT_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Reconnect attempts after the connection drops (0 disables).
    #[arg(long)]
    pub reconnect_attempts: Option<u32>,

    /// Path to config file (default: `~/.config/stompchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "STOMPCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/stompchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("stompchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
