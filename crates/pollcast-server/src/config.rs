// Configuration loading and parsing (pollcast.toml plus environment overrides).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that replaces `server.listen_addr`.
pub const LISTEN_ADDR_ENV: &str = "POLLCAST_LISTEN_ADDR";

const CONFIG_FILE: &str = "pollcast.toml";
const DEFAULT_LOG_FILTER: &str = "pollcast=info,warn";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },

    #[error("invalid value for environment variable {var}: {message}")]
    InvalidEnv { var: String, message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Outbound frames queued per connection before it is dropped as too slow.
    pub subscriber_buffer: usize,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// pollcast.toml structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerSection,
    broadcast: BroadcastSection,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BroadcastSection {
    subscriber_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Write `pollcast.log` here instead of stdout.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/pollcast.toml` relative to `base_dir`, applying
/// environment overrides looked up through `env`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()`, which seeds the config from defaults first.
pub fn load_config_from<F>(base_dir: &Path, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let mut file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let listen_addr = match env(LISTEN_ADDR_ENV) {
        Some(raw) => parse_addr(&raw).map_err(|message| ConfigError::InvalidEnv {
            var: LISTEN_ADDR_ENV.to_string(),
            message,
        })?,
        None => parse_addr(&file.server.listen_addr).map_err(|message| {
            ConfigError::ValidationError {
                field: "server.listen_addr".into(),
                message,
            }
        })?,
    };

    if file.logging.filter.trim().is_empty() {
        file.logging.filter = default_log_filter();
    }

    let config = Config {
        listen_addr,
        subscriber_buffer: file.broadcast.subscriber_buffer,
        logging: file.logging,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/pollcast.toml` from `defaults/pollcast.toml` when it does
/// not exist yet. Returns the path written, or `None` if the config was
/// already present. An existing config is never overwritten.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.is_file() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither config/{CONFIG_FILE} nor defaults/{CONFIG_FILE} found in {}; \
                 run from the server directory or ensure defaults/ is present",
                base_dir.display()
            ),
        });
    }

    if let Some(config_dir) = target.parent() {
        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", config_dir.display()),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    })?;

    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working directory
/// with overrides from the process environment. Seeds the config from
/// defaults on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd, |var| std::env::var(var).ok())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn parse_addr(raw: &str) -> Result<SocketAddr, String> {
    raw.trim()
        .parse()
        .map_err(|e| format!("`{raw}` is not a socket address: {e}"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.subscriber_buffer == 0 {
        return Err(ConfigError::ValidationError {
            field: "broadcast.subscriber_buffer".into(),
            message: "must be greater than 0".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
