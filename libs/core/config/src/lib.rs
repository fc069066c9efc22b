//! Environment-driven configuration shared by the stream pipeline crates.
//!
//! - [`Environment`] selects log output and defaults from `APP_ENV`
//! - `env_*` helpers read and parse single variables
//! - [`FromNamedEnv`] loads settings scoped by component name
//! - [`tracing`] sets up the process-wide subscriber

pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development, // pretty logs, verbose pipeline output
    Production,  // JSON logs
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration of a named component loaded from environment variables
///
/// Implementations read keys built with [`env_key`] so that two components of
/// the same kind can be configured independently.
pub trait FromNamedEnv: Sized {
    fn from_named_env(name: &str) -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Helper to parse an environment variable, falling back to `default` when unset
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Build an environment variable key from a prefix and a component name.
///
/// The name is upper-cased and every non-alphanumeric character becomes `_`,
/// so `env_key("STREAM_PRODUCER", "order-events", "BATCH_SIZE")` is
/// `STREAM_PRODUCER_ORDER_EVENTS_BATCH_SIZE`.
pub fn env_key(prefix: &str, name: &str, setting: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    format!("{prefix}_{name}_{setting}")
}
