//! Configuration management for the field sync server

use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncSettings,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Knobs of the sync orchestrator
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Upper bound on one sync transaction; elapsing rolls the batch back
    pub timeout_secs: u64,
    /// Stored into attribute maps when the request omits `timezone`
    pub default_timezone: String,
}

impl SyncSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            timeout_secs: 30,
            default_timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user id, set by the auth gateway
    pub header: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./fieldsync.db".to_string(),
                max_connections: 5,
            },
            sync: SyncSettings::default(),
            identity: IdentityConfig {
                header: "x-user-id".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let identity_header = env::var("IDENTITY_HEADER")
            .unwrap_or(defaults.identity.header)
            .trim()
            .to_ascii_lowercase();
        if identity_header.is_empty() {
            return Err(ConfigError::Empty("IDENTITY_HEADER"));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: number_var("SERVER_PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: number_var(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            sync: SyncSettings {
                timeout_secs: number_var("SYNC_TIMEOUT_SECS", defaults.sync.timeout_secs)?,
                default_timezone: env::var("SYNC_DEFAULT_TIMEZONE")
                    .unwrap_or(defaults.sync.default_timezone),
            },
            identity: IdentityConfig {
                header: identity_header,
            },
        })
    }
}

fn number_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}
