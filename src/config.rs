//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;

use crate::changeset::ChangesetLimits;

/// Event store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Rows fetched per page when reading streams
    pub read_batch_size: usize,

    /// Maximum length of stream names, event ids and event types
    pub max_name_length: usize,

    /// Maximum number of events in one append
    pub max_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", "10")?;
        let read_batch_size = parse_var("EVENT_STORE_READ_BATCH_SIZE", "100")?;
        let max_name_length = parse_var("EVENT_STORE_MAX_NAME_LENGTH", "255")?;
        let max_batch_size = parse_var("EVENT_STORE_MAX_BATCH_SIZE", "10000")?;

        if read_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EVENT_STORE_READ_BATCH_SIZE"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            read_batch_size,
            max_name_length,
            max_batch_size,
        })
    }

    /// Validation limits for the changeset
    pub fn changeset_limits(&self) -> ChangesetLimits {
        ChangesetLimits {
            max_name_length: self.max_name_length,
            max_batch_size: self.max_batch_size,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default() {
        let value: usize = parse_var("EVENT_STORE_TEST_UNSET_VARIABLE", "42").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_invalid_default() {
        let result: Result<u32, _> = parse_var("EVENT_STORE_TEST_UNSET_VARIABLE", "many");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("EVENT_STORE_TEST_UNSET_VARIABLE"))
        ));
    }

    #[test]
    fn test_changeset_limits() {
        let config = Config {
            database_url: "postgres://localhost/events".to_string(),
            database_max_connections: 5,
            read_batch_size: 50,
            max_name_length: 64,
            max_batch_size: 500,
        };

        let limits = config.changeset_limits();
        assert_eq!(limits.max_name_length, 64);
        assert_eq!(limits.max_batch_size, 500);
    }
}
