//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     SecurityPolicy → ListenerSpecs → construct all → register metrics → start each
//!
//! Shutdown (shutdown.rs):
//!     Stop accepting → Drain connections → Stop event loop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: engine first, then listeners, metrics before traffic
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{
    build_and_start, derive_listener_specs, ListenerSet, ListenerState, SecurityPolicy,
    StartupError, StartupFailure,
};
