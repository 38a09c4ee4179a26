//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

/// Why key material could not be turned into a TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate or key path not configured")]
    NotConfigured,

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("invalid certificate/key pair: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Load TLS configuration from PEM certificate chain and key files.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, TlsError> {
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Read { path, source }
    };

    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(read_err(cert_path))?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key_reader = BufReader::new(File::open(key_path).map_err(read_err(key_path))?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let server_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    tracing::debug!(cert = ?cert_path, key = ?key_path, "TLS key material loaded");

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn loads_fixture_pair() {
        assert!(load_tls_config(&fixture("cert.pem"), &fixture("key.pem")).is_ok());
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = load_tls_config(&fixture("missing.pem"), &fixture("key.pem")).unwrap_err();
        match err {
            TlsError::Read { path, .. } => assert!(path.ends_with("missing.pem")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let err = load_tls_config(&fixture("cert.pem"), &fixture("cert.pem")).unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }

    #[test]
    fn cert_file_without_certificates_is_rejected() {
        let err = load_tls_config(&fixture("key.pem"), &fixture("key.pem")).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }
}
