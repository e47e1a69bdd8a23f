//! Daemon configuration.
//!
//! Loaded from a TOML file, then overridden from the environment. The
//! engine knobs live in [`EngineConfig`]; this adds the transport surface:
//! bind address, database path, rate limits, and the token-to-tenant map
//! of the access gate.
//!
//! ```toml
//! bind_addr = "127.0.0.1:8790"
//! db_path = "quittance.db"
//!
//! [engine]
//! lease_ttl_seconds = 900
//! reaper_interval_seconds = 30
//!
//! [rate_limit]
//! max_requests = 120
//! window_secs = 60
//!
//! [[auth.tokens]]
//! token = "dev-key-acme"
//! tenant_id = "acme"
//! retry_principal = "acme-retries"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use quittance_core::config::EngineConfig;

use crate::http::rate_limit::RateLimitConfig;

/// Environment variable adding one token mapping without a config file.
const ENV_API_TOKEN: &str = "QUITTANCE_API_TOKEN";

/// Tenant the [`ENV_API_TOKEN`] maps to.
const ENV_TENANT_ID: &str = "QUITTANCE_TENANT_ID";

/// Database path override.
const ENV_DB_PATH: &str = "QUITTANCE_DB_PATH";

/// Bind address override.
const ENV_BIND_ADDR: &str = "QUITTANCE_BIND_ADDR";

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML of the expected shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an unusable value.
    #[error("invalid {name}: {value:?}")]
    InvalidEnv {
        /// The variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// One API token and the tenant it authenticates as.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    /// The shared secret presented by the client.
    pub token: SecretString,

    /// The tenant this token resolves to.
    pub tenant_id: String,

    /// Tenant-level retry handler for system escalations.
    #[serde(default)]
    pub retry_principal: Option<String>,
}

/// The access gate's token map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Known tokens.
    pub tokens: Vec<TokenEntry>,
}

/// Full daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the HTTP surface binds to.
    pub bind_addr: SocketAddr,

    /// Path of the `SQLite` database.
    pub db_path: PathBuf,

    /// Engine tuning knobs.
    pub engine: EngineConfig,

    /// Per-tenant rate limits.
    pub rate_limit: RateLimitConfig,

    /// The access gate's token map.
    pub auth: AuthConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8790)),
            db_path: PathBuf::from("quittance.db"),
            engine: EngineConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration: the TOML file when given (or present at the
    /// default path), then environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable or malformed,
    /// or an environment override is unusable.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parses the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable or malformed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(db_path) = std::env::var(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db_path);
        }
        if let Ok(raw) = std::env::var(ENV_BIND_ADDR) {
            self.bind_addr = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_BIND_ADDR,
                value: raw,
            })?;
        }
        if let (Ok(token), Ok(tenant_id)) =
            (std::env::var(ENV_API_TOKEN), std::env::var(ENV_TENANT_ID))
        {
            self.auth.tokens.push(TokenEntry {
                token: SecretString::from(token),
                tenant_id,
                retry_principal: None,
            });
        }
        Ok(())
    }
}
