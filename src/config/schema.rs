//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transport.
//! All types derive Serde traits for deserialization from config files.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::lifecycle::startup::SecurityPolicy;

/// Root configuration for the native transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Listener settings (address, ports, limits).
    pub transport: ListenerConfig,

    /// Client encryption settings.
    pub encryption: EncryptionConfig,

    /// Event loop engine settings.
    pub event_loop: EventLoopConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl TransportConfig {
    /// Resolve the security policy the listener topology is derived from.
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            encryption_enabled: self.encryption.enabled,
            plain_port: self.transport.port,
            secure_port: self.transport.secure_port(),
        }
    }

    /// Parsed bind address. Validation guarantees this parses for loaded configs.
    pub fn bind_ip(&self) -> Option<IpAddr> {
        self.transport.bind_address.parse().ok()
    }
}

/// Listener configuration shared by the plain and the encrypted listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address every listener binds to (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Port for plaintext traffic, or for encrypted traffic in TLS-only mode.
    pub port: u16,

    /// Dedicated port for encrypted traffic. Falls back to `port` when unset.
    pub port_ssl: Option<u16>,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// How long shutdown waits for open connections to drain.
    pub shutdown_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn secure_port(&self) -> u16 {
        self.port_ssl.unwrap_or(self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 9042,
            port_ssl: None,
            max_connections: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Client encryption configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Require TLS for client connections.
    pub enabled: bool,

    /// Path to certificate chain file (PEM).
    pub cert_path: Option<String>,

    /// Path to private key file (PEM).
    pub key_path: Option<String>,
}

/// Event loop engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Prefer the native epoll engine when the platform supports it.
    pub native_epoll_enabled: bool,

    /// Worker thread count. Defaults depend on the selected engine.
    pub worker_threads: Option<usize>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            native_epoll_enabled: true,
            worker_threads: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
