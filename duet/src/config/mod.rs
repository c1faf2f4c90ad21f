//! Configuration for the Duet client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/duet/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use duet_proto::api::DEFAULT_PAGE_SIZE;
use duet_proto::message::UserId;

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

    /// A required setting is absent.
    #[error("missing setting: {0}")]
    Missing(&'static str),

    /// The server URL is unusable.
    #[error("invalid server url {url:?}: {reason}")]
    BadUrl {
        /// The configured value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Top-level TOML file; every field optional for partial overrides.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    user: Option<String>,
    token: Option<String>,
    page_size: Option<usize>,
    request_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server's HTTP API.
    pub server_url: String,
    /// The local user's id.
    pub user: Option<UserId>,
    /// Session token for the local user.
    pub token: Option<String>,
    /// Messages per history page.
    pub page_size: usize,
    /// Per-request timeout for API calls.
    pub request_timeout: Duration,
    /// Handshake timeout for the event stream.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5001".to_string(),
            user: None,
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Loads configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server
                .clone()
                .or_else(|| file.server_url.clone())
                .unwrap_or(defaults.server_url),
            user: cli
                .user
                .clone()
                .or_else(|| file.user.clone())
                .map(UserId::new),
            token: cli.token.clone().or_else(|| file.token.clone()),
            page_size: cli
                .page_size
                .or(file.page_size)
                .unwrap_or(defaults.page_size)
                .max(1),
            request_timeout: file
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            connect_timeout: file
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
        }
    }

    /// The local user and token, both of which are required to connect.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first absent setting.
    pub fn identity(&self) -> Result<(UserId, &str), ConfigError> {
        let user = self.user.clone().ok_or(ConfigError::Missing("user"))?;
        let token = self.token.as_deref().ok_or(ConfigError::Missing("token"))?;
        Ok((user, token))
    }

    /// The parsed HTTP base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadUrl`] if `server_url` is not an `http` or
    /// `https` URL.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url).map_err(|e| self.bad_url(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(self.bad_url(format!("unsupported scheme {other:?}"))),
        }
    }

    /// The event-stream URL for `token`: same host, `ws`/`wss`, path `/ws`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadUrl`] if `server_url` is unusable.
    pub fn events_url(&self, token: &str) -> Result<Url, ConfigError> {
        let mut url = self.api_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| self.bad_url(format!("cannot switch to {scheme}")))?;
        url.set_path("/ws");
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }

    fn bad_url(&self, reason: String) -> ConfigError {
        ConfigError::BadUrl {
            url: self.server_url.clone(),
            reason,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "One-to-one chat in the terminal")]
pub struct CliArgs {
    /// Base URL of the server.
    #[arg(long, env = "DUET_SERVER")]
    pub server: Option<String>,

    /// Your user id.
    #[arg(long, env = "DUET_USER")]
    pub user: Option<String>,

    /// Your session token.
    #[arg(long, env = "DUET_TOKEN")]
    pub token: Option<String>,

    /// Messages per history page.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Path to config file (default: `~/.config/duet/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DUET_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/duet.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Loads and parses a TOML config file.
///
/// An explicit path must exist; the default path may be missing.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("duet").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
