//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::TransportConfig;
use crate::config::validation::{join_errors, validate_config, ValidationError};

/// Environment variable overriding `event_loop.native_epoll_enabled`.
pub const EPOLL_ENABLED_ENV: &str = "NATIVE_TRANSPORT_EPOLL_ENABLED";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<TransportConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: TransportConfig = toml::from_str(&content)?;
    finish(config)
}

/// Defaults plus environment overrides, for running without a config file.
pub fn default_config() -> Result<TransportConfig, ConfigError> {
    finish(TransportConfig::default())
}

fn finish(mut config: TransportConfig) -> Result<TransportConfig, ConfigError> {
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides using the given lookup.
pub fn apply_env_overrides<F>(config: &mut TransportConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(EPOLL_ENABLED_ENV) {
        let enabled = parse_flag(&value);
        tracing::debug!(
            variable = EPOLL_ENABLED_ENV,
            value = %value,
            enabled,
            "Engine preference overridden from environment"
        );
        config.event_loop.native_epoll_enabled = enabled;
    }
}

/// Only a case-insensitive "true" enables a flag.
fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
