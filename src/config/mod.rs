//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TelemetrySettings (validated)
//!     → resolver.rs (header names, redaction, severity floor)
//!     → Arc<TrackingConfig> (immutable, shared)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once resolved
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod resolver;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use resolver::{ConfigResolver, TrackingConfig};
pub use schema::{ApplicationConfig, ListenerConfig, LoggingConfig, TelemetrySettings};
