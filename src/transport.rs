//! The native transport: engine selection plus the listener topology.

use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::validation::{join_errors, validate_config};
use crate::config::{TransportConfig, ValidationError};
use crate::lifecycle::startup::{build_and_start, ListenerSet, StartupError};
use crate::net::event_loop::{
    select_engine, CapabilityProbe, EngineChoice, EventLoopGroup, PlatformProbe,
};
use crate::net::listener::TransportServerFactory;
use crate::observability::metrics::{self, ClientMetrics, MetricsError};
use crate::persistence::Persistence;

/// Grace period for runtime tasks once connections have drained.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("failed to build event loop: {0}")]
    EventLoop(#[from] std::io::Error),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Owns the event loop and every listener of the process.
pub struct NativeTransport {
    config: TransportConfig,
    bind_address: IpAddr,
    event_loop: EventLoopGroup,
    listeners: ListenerSet,
    started: bool,
}

impl NativeTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Self::with_probe(config, &PlatformProbe)
    }

    /// Like [`NativeTransport::new`] with an explicit capability probe.
    pub fn with_probe(
        config: TransportConfig,
        probe: &dyn CapabilityProbe,
    ) -> Result<Self, TransportError> {
        validate_config(&config).map_err(TransportError::InvalidConfig)?;
        let bind_address = config.bind_ip().ok_or_else(|| {
            TransportError::InvalidConfig(vec![ValidationError::InvalidBindAddress(
                config.transport.bind_address.clone(),
            )])
        })?;

        let selection = select_engine(config.event_loop.native_epoll_enabled, probe);
        let event_loop = EventLoopGroup::new(selection, config.event_loop.worker_threads)?;

        Ok(Self {
            config,
            bind_address,
            event_loop,
            listeners: ListenerSet::default(),
            started: false,
        })
    }

    pub fn engine(&self) -> EngineChoice {
        self.event_loop.engine()
    }

    pub fn event_loop(&self) -> &EventLoopGroup {
        &self.event_loop
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Listeners built by `start`, including a partial set after a failed start.
    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    /// Serve the Prometheus endpoint from the transport's event loop.
    pub fn install_metrics_exporter(&self) -> Result<(), TransportError> {
        let addr = self
            .config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| {
                TransportError::InvalidConfig(vec![ValidationError::InvalidMetricsAddress(
                    self.config.observability.metrics_address.clone(),
                )])
            })?;
        let _guard = self.event_loop.handle().enter();
        metrics::init_exporter(addr)?;
        Ok(())
    }

    /// Build, register and start every listener for the configured policy.
    ///
    /// On failure, listeners that did start keep running; `shutdown` stops them.
    pub fn start<P: Persistence>(
        &mut self,
        persistence: Arc<P>,
        metrics: &dyn ClientMetrics,
    ) -> Result<(), StartupError> {
        if self.started {
            return Err(StartupError::AlreadyStarted);
        }
        self.started = true;

        let encryption = &self.config.encryption;
        let factory = TransportServerFactory::new(persistence, &self.event_loop)
            .with_key_material(
                encryption.cert_path.as_ref().map(PathBuf::from),
                encryption.key_path.as_ref().map(PathBuf::from),
            )
            .with_max_connections(self.config.transport.max_connections);

        let policy = self.config.security_policy();
        match build_and_start(
            &policy,
            self.bind_address,
            self.engine(),
            &factory,
            metrics,
        ) {
            Ok(listeners) => {
                self.listeners = listeners;
                Ok(())
            }
            Err(failure) => {
                self.listeners = failure.listeners;
                Err(failure.error)
            }
        }
    }

    /// Drive a future on the transport's event loop, e.g. a shutdown signal.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.event_loop.block_on(future)
    }

    /// Stop accepting, let open connections drain, then stop the event loop.
    pub fn shutdown(mut self) {
        self.listeners.stop_all();

        let timeout = Duration::from_secs(self.config.transport.shutdown_timeout_secs);
        let trackers = self.listeners.trackers();
        let drained = self.event_loop.block_on(async {
            tokio::time::timeout(timeout, async {
                for tracker in &trackers {
                    tracker.wait_for_drain().await;
                }
            })
            .await
        });

        match drained {
            Ok(()) => tracing::info!("All client connections drained"),
            Err(_) => tracing::warn!(
                open_connections = self.listeners.connected_clients(),
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout reached with open connections"
            ),
        }

        drop(self.listeners);
        self.event_loop.shutdown(RUNTIME_SHUTDOWN_GRACE);
        tracing::info!("Native transport stopped");
    }
}
