//! Listener topology startup.
//!
//! # Responsibilities
//! - Derive the listeners to create from the security policy
//! - Construct every listener before any of them accepts traffic
//! - Register the complete set with the metrics registry in one call
//! - Start listeners in derivation order
//!
//! # Design Decisions
//! - Fail fast: the first error ends startup, nothing is retried
//! - No rollback: listeners already started keep running and are returned
//!   to the caller inside the failure for its shutdown path
//! - Derivation is a pure function so the policy is testable without sockets

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::net::connection::ConnectionTracker;
use crate::net::event_loop::EngineChoice;
use crate::net::listener::{ListenerError, ListenerFactory, ListenerSpec, TransportListener};
use crate::observability::metrics::{ClientMetrics, ListenerEndpoint, MetricsError};

/// Which ports carry which kind of client traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub encryption_enabled: bool,
    pub plain_port: u16,
    pub secure_port: u16,
}

/// Compute the listeners a policy calls for, plaintext first.
pub fn derive_listener_specs(
    policy: &SecurityPolicy,
    bind_address: IpAddr,
    engine: EngineChoice,
) -> Vec<ListenerSpec> {
    let spec = |port, tls_enabled| ListenerSpec {
        bind_address,
        port,
        tls_enabled,
        engine,
    };

    if !policy.encryption_enabled {
        vec![spec(policy.plain_port, false)]
    } else if policy.plain_port != policy.secure_port {
        // dedicated secure port: serve plaintext and encrypted clients side by side
        vec![spec(policy.plain_port, false), spec(policy.secure_port, true)]
    } else {
        vec![spec(policy.plain_port, true)]
    }
}

/// Where a listener is in its startup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Constructed,
    Registered,
    Started,
    Stopped,
}

struct ManagedListener {
    listener: Box<dyn TransportListener>,
    state: ListenerState,
}

/// The listeners of one transport, in construction order.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<ManagedListener>,
}

impl ListenerSet {
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn specs(&self) -> Vec<ListenerSpec> {
        self.listeners.iter().map(|m| *m.listener.spec()).collect()
    }

    pub fn states(&self) -> Vec<ListenerState> {
        self.listeners.iter().map(|m| m.state).collect()
    }

    /// Bound addresses of the started listeners.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|m| m.listener.local_addr())
            .collect()
    }

    pub fn trackers(&self) -> Vec<ConnectionTracker> {
        self.listeners
            .iter()
            .map(|m| m.listener.tracker().clone())
            .collect()
    }

    pub fn connected_clients(&self) -> u64 {
        self.listeners
            .iter()
            .map(|m| m.listener.tracker().active_count())
            .sum()
    }

    /// Stop accepting on every started listener.
    pub fn stop_all(&mut self) {
        for managed in &mut self.listeners {
            if managed.state == ListenerState::Started {
                managed.listener.stop();
                managed.state = ListenerState::Stopped;
            }
        }
    }

    fn endpoints(&self) -> Vec<ListenerEndpoint> {
        self.listeners
            .iter()
            .map(|m| ListenerEndpoint {
                spec: *m.listener.spec(),
                tracker: m.listener.tracker().clone(),
            })
            .collect()
    }

    fn push(&mut self, listener: Box<dyn TransportListener>) {
        self.listeners.push(ManagedListener {
            listener,
            state: ListenerState::Constructed,
        });
    }

    fn mark_all(&mut self, state: ListenerState) {
        for managed in &mut self.listeners {
            managed.state = state;
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.listeners
                    .iter()
                    .map(|m| (m.listener.spec().to_string(), m.state)),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("transport already started")]
    AlreadyStarted,
}

/// A failed startup, with every listener constructed before the failure.
#[derive(Debug, Error)]
#[error("listener startup failed: {error}")]
pub struct StartupFailure {
    #[source]
    pub error: StartupError,
    pub listeners: ListenerSet,
}

/// Construct, register and start the listeners the policy calls for.
pub fn build_and_start(
    policy: &SecurityPolicy,
    bind_address: IpAddr,
    engine: EngineChoice,
    factory: &dyn ListenerFactory,
    metrics: &dyn ClientMetrics,
) -> Result<ListenerSet, StartupFailure> {
    let specs = derive_listener_specs(policy, bind_address, engine);
    let mut set = ListenerSet::default();

    for spec in &specs {
        match factory.build(spec) {
            Ok(listener) => set.push(listener),
            Err(e) => return Err(failure(e.into(), set)),
        }
    }

    if let Err(e) = metrics.init(&set.endpoints()) {
        return Err(failure(e.into(), set));
    }
    set.mark_all(ListenerState::Registered);

    for index in 0..set.len() {
        let managed = &mut set.listeners[index];
        match managed.listener.start() {
            Ok(()) => managed.state = ListenerState::Started,
            Err(e) => {
                tracing::error!(
                    listener = %managed.listener.spec(),
                    error = %e,
                    "Listener failed to start"
                );
                return Err(failure(e.into(), set));
            }
        }
    }

    tracing::info!(
        listeners = set.len(),
        encryption = policy.encryption_enabled,
        engine = %engine,
        "Native transport listeners started"
    );
    Ok(set)
}

fn failure(error: StartupError, listeners: ListenerSet) -> StartupFailure {
    StartupFailure { error, listeners }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    const LOCALHOST: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Built(u16),
        Registered(Vec<u16>),
        Started(u16),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct FakeListener {
        spec: ListenerSpec,
        tracker: ConnectionTracker,
        log: Log,
        fail_start: bool,
        started: bool,
    }

    impl TransportListener for FakeListener {
        fn spec(&self) -> &ListenerSpec {
            &self.spec
        }

        fn tracker(&self) -> &ConnectionTracker {
            &self.tracker
        }

        fn start(&mut self) -> Result<(), ListenerError> {
            if self.fail_start {
                return Err(ListenerError::Bind {
                    addr: self.spec.socket_addr(),
                    source: io::Error::from(io::ErrorKind::AddrInUse),
                });
            }
            self.log.lock().unwrap().push(Event::Started(self.spec.port));
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.started = false;
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            self.started.then(|| self.spec.socket_addr())
        }

        fn is_accepting(&self) -> bool {
            self.started
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        log: Log,
        fail_build_on: Option<u16>,
        fail_start_on: Option<u16>,
    }

    impl ListenerFactory for FakeFactory {
        fn build(&self, spec: &ListenerSpec) -> Result<Box<dyn TransportListener>, ListenerError> {
            if self.fail_build_on == Some(spec.port) {
                return Err(ListenerError::Tls {
                    port: spec.port,
                    source: crate::net::tls::TlsError::NotConfigured,
                });
            }
            self.log.lock().unwrap().push(Event::Built(spec.port));
            Ok(Box::new(FakeListener {
                spec: *spec,
                tracker: ConnectionTracker::new(),
                log: Arc::clone(&self.log),
                fail_start: self.fail_start_on == Some(spec.port),
                started: false,
            }))
        }
    }

    struct FakeMetrics {
        log: Log,
    }

    impl ClientMetrics for FakeMetrics {
        fn init(&self, listeners: &[ListenerEndpoint]) -> Result<(), MetricsError> {
            let ports = listeners.iter().map(|l| l.spec.port).collect();
            self.log.lock().unwrap().push(Event::Registered(ports));
            Ok(())
        }
    }

    fn policy(encryption_enabled: bool, plain_port: u16, secure_port: u16) -> SecurityPolicy {
        SecurityPolicy {
            encryption_enabled,
            plain_port,
            secure_port,
        }
    }

    fn ports_and_tls(specs: &[ListenerSpec]) -> Vec<(u16, bool)> {
        specs.iter().map(|s| (s.port, s.tls_enabled)).collect()
    }

    #[test]
    fn plaintext_only_when_encryption_disabled() {
        for secure_port in [9042, 9142, 0] {
            let specs = derive_listener_specs(
                &policy(false, 9042, secure_port),
                LOCALHOST,
                EngineChoice::NativeEpoll,
            );
            assert_eq!(ports_and_tls(&specs), vec![(9042, false)]);
        }
    }

    #[test]
    fn dedicated_secure_port_adds_second_listener() {
        let specs =
            derive_listener_specs(&policy(true, 9042, 9142), LOCALHOST, EngineChoice::NativeEpoll);
        assert_eq!(ports_and_tls(&specs), vec![(9042, false), (9142, true)]);
    }

    #[test]
    fn shared_port_is_secure_only() {
        let specs =
            derive_listener_specs(&policy(true, 9042, 9042), LOCALHOST, EngineChoice::NativeEpoll);
        assert_eq!(ports_and_tls(&specs), vec![(9042, true)]);
    }

    #[test]
    fn specs_share_engine_and_address() {
        let specs =
            derive_listener_specs(&policy(true, 9042, 9142), LOCALHOST, EngineChoice::PortableNio);
        assert!(specs
            .iter()
            .all(|s| s.engine == EngineChoice::PortableNio && s.bind_address == LOCALHOST));
    }

    #[test]
    fn registration_precedes_every_start() {
        let factory = FakeFactory::default();
        let metrics = FakeMetrics {
            log: Arc::clone(&factory.log),
        };

        let set = build_and_start(
            &policy(true, 9042, 9142),
            LOCALHOST,
            EngineChoice::NativeEpoll,
            &factory,
            &metrics,
        )
        .unwrap();

        assert_eq!(
            *factory.log.lock().unwrap(),
            vec![
                Event::Built(9042),
                Event::Built(9142),
                Event::Registered(vec![9042, 9142]),
                Event::Started(9042),
                Event::Started(9142),
            ]
        );
        assert_eq!(set.states(), vec![ListenerState::Started; 2]);
        assert_eq!(set.local_addrs().len(), 2);
    }

    #[test]
    fn start_failure_keeps_started_listeners() {
        let factory = FakeFactory {
            fail_start_on: Some(9142),
            ..Default::default()
        };
        let metrics = FakeMetrics {
            log: Arc::clone(&factory.log),
        };

        let failure = build_and_start(
            &policy(true, 9042, 9142),
            LOCALHOST,
            EngineChoice::NativeEpoll,
            &factory,
            &metrics,
        )
        .unwrap_err();

        assert!(matches!(
            failure.error,
            StartupError::Listener(ListenerError::Bind { .. })
        ));
        assert_eq!(
            failure.listeners.states(),
            vec![ListenerState::Started, ListenerState::Registered]
        );
        assert_eq!(failure.listeners.local_addrs().len(), 1);
    }

    #[test]
    fn construction_failure_registers_nothing() {
        let factory = FakeFactory {
            fail_build_on: Some(9142),
            ..Default::default()
        };
        let metrics = FakeMetrics {
            log: Arc::clone(&factory.log),
        };

        let failure = build_and_start(
            &policy(true, 9042, 9142),
            LOCALHOST,
            EngineChoice::NativeEpoll,
            &factory,
            &metrics,
        )
        .unwrap_err();

        assert!(matches!(
            failure.error,
            StartupError::Listener(ListenerError::Tls { port: 9142, .. })
        ));
        assert_eq!(failure.listeners.states(), vec![ListenerState::Constructed]);
        assert_eq!(*factory.log.lock().unwrap(), vec![Event::Built(9042)]);
    }

    #[test]
    fn stop_all_only_touches_started_listeners() {
        let factory = FakeFactory {
            fail_start_on: Some(9142),
            ..Default::default()
        };
        let metrics = FakeMetrics {
            log: Arc::clone(&factory.log),
        };

        let mut failure = build_and_start(
            &policy(true, 9042, 9142),
            LOCALHOST,
            EngineChoice::NativeEpoll,
            &factory,
            &metrics,
        )
        .unwrap_err();

        failure.listeners.stop_all();
        assert_eq!(
            failure.listeners.states(),
            vec![ListenerState::Stopped, ListenerState::Registered]
        );
        assert!(failure.listeners.local_addrs().is_empty());
    }
}
