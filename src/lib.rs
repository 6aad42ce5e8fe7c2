//! Request telemetry for axum services.
//!
//! Assigns and propagates tracking identifiers, emits structured telemetry
//! with redacted request/response metadata, and turns unhandled faults into
//! a deterministic response.
//!
//! ```text
//! let telemetry = Telemetry::new(config, Arc::new(TracingSink));
//! let app = Router::new()
//!     .route("/orders", post(create_order))
//!     .layer(telemetry.pipeline().build());
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod runtime;
pub mod telemetry;
pub mod tracking;

pub use config::{TelemetrySettings, TrackingConfig};
pub use error::TelemetryError;
pub use http::{ExceptionHandler, Fault, HttpServer, PipelineBuilder, RequestHook, TelemetryLayer};
pub use lifecycle::Shutdown;
pub use runtime::Telemetry;
pub use telemetry::{TelemetryClient, TelemetryEvent, TelemetrySink};
pub use tracking::{current_identity, RequestIdentity};
