//! The execution backend that accepted connections are handed to.
//!
//! The transport never inspects the backend: it is passed unchanged to every
//! listener, and each accepted (and, for secure listeners, decrypted) stream is
//! given to [`Persistence::serve`]. Framing, sessions and query execution all
//! live behind this trait.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A protocol backend serving client connections.
pub trait Persistence: Send + Sync + 'static {
    /// Serve one client until it disconnects.
    fn serve<S>(&self, stream: S, peer: SocketAddr) -> impl Future<Output = io::Result<()>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static;
}

/// Backend that reads and drops everything a client sends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPersistence;

impl Persistence for DiscardPersistence {
    async fn serve<S>(&self, mut stream: S, peer: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut buf = [0u8; 4096];
        let mut total = 0usize;
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        tracing::debug!(peer = %peer, bytes = total, "Client disconnected");
        Ok(())
    }
}
