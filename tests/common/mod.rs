//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use native_transport::config::TransportConfig;
use native_transport::net::event_loop::{CapabilityProbe, NativeAvailability};
use rustls::pki_types::ServerName;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Loopback config with small thread pools and metrics export disabled.
pub fn config(port: u16, port_ssl: Option<u16>, encryption: bool) -> TransportConfig {
    let mut config = TransportConfig::default();
    config.transport.bind_address = "127.0.0.1".into();
    config.transport.port = port;
    config.transport.port_ssl = port_ssl;
    config.transport.shutdown_timeout_secs = 1;
    config.event_loop.worker_threads = Some(2);
    config.observability.metrics_enabled = false;
    config.encryption.enabled = encryption;
    if encryption {
        config.encryption.cert_path = Some(fixture("cert.pem").display().to_string());
        config.encryption.key_path = Some(fixture("key.pem").display().to_string());
    }
    config
}

/// Probe with a fixed answer.
pub struct FixedProbe {
    pub available: bool,
    pub expected: bool,
}

impl CapabilityProbe for FixedProbe {
    fn availability(&self) -> NativeAvailability {
        if self.available {
            NativeAvailability::Available
        } else {
            NativeAvailability::Unavailable {
                cause: "libtransport-epoll not loaded".into(),
            }
        }
    }

    fn native_expected(&self) -> bool {
        self.expected
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn client_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = BufReader::new(File::open(fixture("ca.pem")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    Arc::new(
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth(),
    )
}

/// Connect, complete a TLS handshake against the test CA and send a few bytes.
pub fn tls_connect(
    addr: SocketAddr,
) -> io::Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>> {
    let server_name = ServerName::try_from("localhost").map_err(io::Error::other)?;
    let conn =
        rustls::ClientConnection::new(client_config(), server_name).map_err(io::Error::other)?;
    let tcp = TcpStream::connect(addr)?;
    tcp.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut stream = rustls::StreamOwned::new(conn, tcp);
    stream.write_all(b"STARTUP")?;
    stream.flush()?;
    Ok(stream)
}
