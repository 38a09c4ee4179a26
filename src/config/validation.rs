//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//! - Check that encryption settings come with key material paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Whether the key material is readable is checked by the listener itself

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::TransportConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transport.bind_address {0:?} is not an IP address")]
    InvalidBindAddress(String),

    #[error("transport.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("event_loop.worker_threads must be greater than zero")]
    ZeroWorkerThreads,

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("encryption is enabled but encryption.{0} is not set")]
    MissingKeyMaterial(&'static str),
}

/// Render a list of validation errors on one line.
pub(crate) fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.transport.bind_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.transport.bind_address.clone(),
        ));
    }

    if config.transport.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    if config.event_loop.worker_threads == Some(0) {
        errors.push(ValidationError::ZeroWorkerThreads);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.encryption.enabled {
        if config.encryption.cert_path.is_none() {
            errors.push(ValidationError::MissingKeyMaterial("cert_path"));
        }
        if config.encryption.key_path.is_none() {
            errors.push(ValidationError::MissingKeyMaterial("key_path"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
