//! Native protocol transport bootstrap.
//!
//! Selects the event loop engine, derives the plaintext and encrypted listeners
//! from the encryption settings, registers them with client metrics and starts
//! them. What happens on an accepted connection belongs to the [`Persistence`]
//! backend.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod persistence;
pub mod transport;

pub use config::TransportConfig;
pub use persistence::{DiscardPersistence, Persistence};
pub use transport::{NativeTransport, TransportError};
