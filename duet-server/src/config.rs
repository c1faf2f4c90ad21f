//! Configuration for the Duet server.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/duet-server/config.toml`)
//! 4. Compiled defaults
//!
//! The user directory is only ever seeded from the file.

use std::path::PathBuf;
use std::time::Duration;

use duet_proto::api::DEFAULT_PAGE_SIZE;
use duet_proto::codec::MAX_FRAME_SIZE;

/// Errors that can occur when loading server configuration.
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

    /// The resolved values contradict each other.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerSection,
    users: Vec<UserSeed>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    default_page_size: Option<usize>,
    max_page_size: Option<usize>,
    store_timeout_ms: Option<u64>,
    max_frame_size: Option<usize>,
}

/// A `[[users]]` entry: one account and the bearer token it signs in with.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserSeed {
    /// Stable user id.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// Contact address; never exposed to other users.
    #[serde(default)]
    pub email: String,
    /// Avatar URL.
    #[serde(default)]
    pub profile_pic: String,
    /// Bearer token accepted for this user.
    pub token: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the Duet server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Duet one-to-one chat server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "DUET_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/duet-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Page size used when a history request gives no limit.
    #[arg(long)]
    pub default_page_size: Option<usize>,

    /// Largest page a history request may ask for.
    #[arg(long)]
    pub max_page_size: Option<usize>,

    /// Milliseconds a store operation may take before it is abandoned.
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DUET_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:5001`).
    pub bind_addr: String,
    /// Page size when the caller gives none.
    pub default_page_size: usize,
    /// Upper clamp for requested page sizes.
    pub max_page_size: usize,
    /// Deadline for every store call.
    pub store_timeout: Duration,
    /// Largest inbound event frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Accounts known to the server.
    pub users: Vec<UserSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 100,
            store_timeout: Duration::from_millis(5000),
            max_frame_size: MAX_FRAME_SIZE,
            log_level: "info".to_string(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path is tried and a missing file is treated as
    /// empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the page sizes are inconsistent.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, file);
        config.validate()?;
        Ok(config)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Self {
        let defaults = Self::default();
        let server = file.server;

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            default_page_size: cli
                .default_page_size
                .or(server.default_page_size)
                .unwrap_or(defaults.default_page_size),
            max_page_size: cli
                .max_page_size
                .or(server.max_page_size)
                .unwrap_or(defaults.max_page_size),
            store_timeout: cli
                .store_timeout_ms
                .or(server.store_timeout_ms)
                .map_or(defaults.store_timeout, Duration::from_millis),
            max_frame_size: server
                .max_frame_size
                .unwrap_or(defaults.max_frame_size),
            log_level: cli.log_level.clone(),
            users: file.users,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 || self.default_page_size == 0 {
            return Err(ConfigError::Invalid("page sizes must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid("store_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Clamps a requested page size into `1..=max_page_size`, falling back
    /// to the default when none is given.
    #[must_use]
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("duet-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
