//! Configuration management for the relay.

use std::env;

/// Relay configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared bearer token; when unset, anonymous access is allowed
    pub auth_token: Option<String>,
    /// Hard cap on entries per pull page
    pub max_page_size: i64,
}

/// Default cap on entries per pull page.
const DEFAULT_MAX_PAGE_SIZE: i64 = 1000;

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let auth_token = env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let max_page_size = match env::var("MAX_PAGE_SIZE") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidMaxPageSize)?,
            Err(_) => DEFAULT_MAX_PAGE_SIZE,
        };
        if max_page_size < 1 {
            return Err(ConfigError::InvalidMaxPageSize);
        }

        Ok(Self {
            host,
            port,
            database_url,
            auth_token,
            max_page_size,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("MAX_PAGE_SIZE must be a positive integer")]
    InvalidMaxPageSize,
}
