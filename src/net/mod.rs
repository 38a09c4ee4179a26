//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     event_loop.rs (engine probe + selection, shared runtime)
//!     → listener.rs (factory builds one listener per spec)
//!     → tls.rs (key material for secure listeners)
//!
//! Incoming TCP connection:
//!     → listener.rs (accept loop, connection limits)
//!     → optional TLS handshake
//!     → connection.rs (lifecycle tracking, metrics)
//!     → Hand off to the persistence backend
//! ```
//!
//! # Design Decisions
//! - One engine per process; every listener runs on the same runtime
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod event_loop;
pub mod listener;
pub mod tls;

pub use event_loop::{EngineChoice, EventLoopGroup};
pub use listener::{ListenerError, ListenerFactory, ListenerSpec, TransportListener};
