//! Transport listeners.
//!
//! # Responsibilities
//! - Describe one listener to create (`ListenerSpec`)
//! - Build listeners from specs (`ListenerFactory`), without accepting yet
//! - Bind on start and run the accept loop on the shared event loop
//! - Enforce max_connections limit via semaphore
//! - Terminate TLS for secure listeners before handing streams to the backend

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::net::connection::ConnectionTracker;
use crate::net::event_loop::{EngineChoice, EventLoopGroup};
use crate::net::tls::{load_tls_config, TlsError};
use crate::persistence::Persistence;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to claim the port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Secure listener without usable key material.
    #[error("TLS setup for port {port} failed: {source}")]
    Tls {
        port: u16,
        #[source]
        source: TlsError,
    },

    /// Spec built for a different engine than the one the factory runs on.
    #[error("listener spec targets {found} but the event loop runs {expected}")]
    EngineMismatch {
        expected: EngineChoice,
        found: EngineChoice,
    },

    #[error("listener on {0} already started")]
    AlreadyStarted(SocketAddr),
}

/// One concrete listener to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    pub bind_address: IpAddr,
    pub port: u16,
    pub tls_enabled: bool,
    pub engine: EngineChoice,
}

impl ListenerSpec {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.tls_enabled { "tls" } else { "plain" };
        write!(f, "{} ({})", self.socket_addr(), mode)
    }
}

/// A constructed listener. Construction never accepts connections; `start` does.
pub trait TransportListener: Send {
    fn spec(&self) -> &ListenerSpec;

    /// Connection tracker the metrics registry observes.
    fn tracker(&self) -> &ConnectionTracker;

    /// Bind the port and begin accepting.
    fn start(&mut self) -> Result<(), ListenerError>;

    /// Stop accepting new connections. Open connections are left to drain.
    fn stop(&mut self);

    /// Address actually bound, once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Whether the accept loop is still running.
    fn is_accepting(&self) -> bool;
}

/// Builds listeners from specs.
pub trait ListenerFactory {
    fn build(&self, spec: &ListenerSpec) -> Result<Box<dyn TransportListener>, ListenerError>;
}

/// Factory for [`TransportServer`]s sharing one backend and one event loop.
pub struct TransportServerFactory<P> {
    persistence: Arc<P>,
    runtime: Handle,
    engine: EngineChoice,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    max_connections: usize,
}

impl<P: Persistence> TransportServerFactory<P> {
    pub fn new(persistence: Arc<P>, event_loop: &EventLoopGroup) -> Self {
        Self {
            persistence,
            runtime: event_loop.handle().clone(),
            engine: event_loop.engine(),
            cert_path: None,
            key_path: None,
            max_connections: 10_000,
        }
    }

    pub fn with_key_material(
        mut self,
        cert_path: Option<PathBuf>,
        key_path: Option<PathBuf>,
    ) -> Self {
        self.cert_path = cert_path;
        self.key_path = key_path;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    fn tls_config(&self, port: u16) -> Result<RustlsConfig, ListenerError> {
        let to_err = |source| ListenerError::Tls { port, source };
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key).map_err(to_err),
            _ => Err(to_err(TlsError::NotConfigured)),
        }
    }
}

impl<P: Persistence> ListenerFactory for TransportServerFactory<P> {
    fn build(&self, spec: &ListenerSpec) -> Result<Box<dyn TransportListener>, ListenerError> {
        if spec.engine != self.engine {
            return Err(ListenerError::EngineMismatch {
                expected: self.engine,
                found: spec.engine,
            });
        }

        let tls = if spec.tls_enabled {
            Some(self.tls_config(spec.port)?)
        } else {
            None
        };

        tracing::debug!(
            address = %spec.socket_addr(),
            tls = spec.tls_enabled,
            engine = %spec.engine,
            "Listener constructed"
        );

        Ok(Box::new(TransportServer {
            spec: *spec,
            persistence: Arc::clone(&self.persistence),
            runtime: self.runtime.clone(),
            tls,
            connection_limit: Arc::new(Semaphore::new(self.max_connections)),
            max_connections: self.max_connections,
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            local_addr: None,
            accept_task: None,
        }))
    }
}

/// A TCP listener, optionally TLS, serving one port for one backend.
pub struct TransportServer<P> {
    spec: ListenerSpec,
    persistence: Arc<P>,
    runtime: Handle,
    tls: Option<RustlsConfig>,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl<P: Persistence> TransportServer<P> {
    fn bind(&self) -> Result<TcpListener, ListenerError> {
        let addr = self.spec.socket_addr();
        let bind_err = |source| ListenerError::Bind { addr, source };

        // Blocking bind so a taken port fails the caller immediately.
        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;

        let _guard = self.runtime.enter();
        TcpListener::from_std(std_listener).map_err(bind_err)
    }
}

impl<P: Persistence> TransportListener for TransportServer<P> {
    fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    fn start(&mut self) -> Result<(), ListenerError> {
        if let Some(addr) = self.local_addr {
            return Err(ListenerError::AlreadyStarted(addr));
        }

        let listener = self.bind()?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: self.spec.socket_addr(),
            source,
        })?;

        let accept_loop = AcceptLoop {
            listener,
            tls: self.tls.clone().map(RustlsAcceptor::new),
            connection_limit: Arc::clone(&self.connection_limit),
            tracker: self.tracker.clone(),
            persistence: Arc::clone(&self.persistence),
            shutdown: self.shutdown.subscribe(),
            local_addr,
        };
        self.accept_task = Some(self.runtime.spawn(accept_loop.run()));
        self.local_addr = Some(local_addr);

        tracing::info!(
            address = %local_addr,
            tls = self.spec.tls_enabled,
            max_connections = self.max_connections,
            "Listening for native protocol clients"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if !self.shutdown.is_triggered() {
            self.shutdown.trigger();
            if let Some(addr) = self.local_addr {
                tracing::info!(address = %addr, "Stopped listening for native protocol clients");
            }
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn is_accepting(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<P> Drop for TransportServer<P> {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// State moved onto the event loop by `start`.
struct AcceptLoop<P> {
    listener: TcpListener,
    tls: Option<RustlsAcceptor>,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
    persistence: Arc<P>,
    shutdown: ShutdownListener,
    local_addr: SocketAddr,
}

impl<P: Persistence> AcceptLoop<P> {
    async fn run(mut self) {
        loop {
            // Acquire permit first (backpressure)
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(
                            address = %self.local_addr,
                            error = %e,
                            "Failed to accept connection"
                        );
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            let guard = self.tracker.track();
            tracing::debug!(
                address = %self.local_addr,
                peer_addr = %peer,
                connection_id = %guard.id(),
                available_permits = self.connection_limit.available_permits(),
                "Connection accepted"
            );

            let persistence = Arc::clone(&self.persistence);
            let tls = self.tls.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream, ()).await {
                        Ok((stream, ())) => persistence.serve(stream, peer).await,
                        Err(e) => {
                            tracing::debug!(
                                connection_id = %guard.id(),
                                peer_addr = %peer,
                                error = %e,
                                "TLS handshake failed"
                            );
                            Ok(())
                        }
                    },
                    None => persistence.serve(stream, peer).await,
                };
                if let Err(e) = result {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        error = %e,
                        "Connection closed with error"
                    );
                }
                drop(guard);
            });
        }

        tracing::debug!(address = %self.local_addr, "Accept loop stopped");
    }
}
