//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Accept the final listener set once, before any listener starts
//! - Attach per-listener connection metrics to each listener's tracker
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `native_transport_listeners` (gauge): listeners in the registered topology
//! - `native_transport_connected_clients` (gauge): open connections by port, tls
//! - `native_transport_connections_total` (counter): accepted connections by port, tls

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;

use crate::net::connection::{ConnectionGauges, ConnectionTracker};
use crate::net::listener::ListenerSpec;

pub const LISTENERS: &str = "native_transport_listeners";
pub const CONNECTED_CLIENTS: &str = "native_transport_connected_clients";
pub const CONNECTIONS_TOTAL: &str = "native_transport_connections_total";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("client metrics already initialized")]
    AlreadyInitialized,

    #[error("failed to install Prometheus exporter: {0}")]
    Exporter(#[from] BuildError),
}

/// What the registry sees of one listener.
#[derive(Debug, Clone)]
pub struct ListenerEndpoint {
    pub spec: ListenerSpec,
    pub tracker: ConnectionTracker,
}

/// Registry the complete listener set is handed to before anything starts.
pub trait ClientMetrics {
    fn init(&self, listeners: &[ListenerEndpoint]) -> Result<(), MetricsError>;
}

/// Client metrics published through the `metrics` facade.
#[derive(Debug, Default)]
pub struct PrometheusClientMetrics {
    endpoints: OnceLock<Vec<ListenerEndpoint>>,
}

impl PrometheusClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered listeners, empty before `init`.
    pub fn endpoints(&self) -> &[ListenerEndpoint] {
        self.endpoints.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Open connections summed over every registered listener.
    pub fn connected_clients(&self) -> u64 {
        self.endpoints()
            .iter()
            .map(|endpoint| endpoint.tracker.active_count())
            .sum()
    }
}

impl ClientMetrics for PrometheusClientMetrics {
    fn init(&self, listeners: &[ListenerEndpoint]) -> Result<(), MetricsError> {
        self.endpoints
            .set(listeners.to_vec())
            .map_err(|_| MetricsError::AlreadyInitialized)?;

        describe_gauge!(LISTENERS, Unit::Count, "Listeners in the native transport topology");
        describe_gauge!(CONNECTED_CLIENTS, Unit::Count, "Open client connections");
        describe_counter!(CONNECTIONS_TOTAL, Unit::Count, "Accepted client connections");

        gauge!(LISTENERS).set(listeners.len() as f64);

        for endpoint in listeners {
            let port = endpoint.spec.port.to_string();
            let tls = if endpoint.spec.tls_enabled { "true" } else { "false" };
            endpoint.tracker.attach_gauges(ConnectionGauges {
                connected: gauge!(CONNECTED_CLIENTS, "port" => port.clone(), "tls" => tls),
                accepted: counter!(CONNECTIONS_TOTAL, "port" => port, "tls" => tls),
            });
        }

        tracing::info!(listeners = listeners.len(), "Client metrics registered");
        Ok(())
    }
}

/// Install the Prometheus exporter. Must be called from within a Tokio runtime context.
pub fn init_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
