//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), or defaults
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → TransportConfig (validated, immutable)
//!     → SecurityPolicy + EngineChoice for startup
//! ```
//!
//! # Design Decisions
//! - Config is resolved once before startup; ports and modes never change afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{default_config, load_config, ConfigError};
pub use schema::{
    EncryptionConfig, EventLoopConfig, ListenerConfig, ObservabilityConfig, TransportConfig,
};
pub use validation::ValidationError;
