//! Telemetry emission.
//!
//! # Data Flow
//! ```text
//! TelemetryEvent (event.rs)
//!     → TelemetryClient (client.rs)
//!         → initializers.rs (identity, static properties, service name, user)
//!     → TelemetrySink (sink.rs: tracing, channel, memory)
//! ```

pub mod client;
pub mod dependency;
pub mod event;
pub mod initializers;
pub mod sink;

pub use client::TelemetryClient;
pub use dependency::DependencyTimer;
pub use event::{EventKind, Severity, TelemetryEvent};
pub use initializers::{
    IdentityInitializer, ServiceNameInitializer, StaticPropertiesInitializer, TelemetryInitializer,
};
pub use sink::{ChannelSink, MemorySink, TelemetrySink, TracingSink};
