//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, outer layers)
//!     → pipeline.rs (hooks, identity scope, fault capture)
//!         → middleware/tracking.rs (ids on request and response)
//!     → application handler
//!     → exception.rs (on fault: custom handlers or default 500)
//!     → Send to client
//! ```

pub mod exception;
pub mod middleware;
pub mod pipeline;
pub mod server;

pub use exception::{DefaultExceptionHandler, ExceptionHandler, Fault, FaultKind};
pub use middleware::TrackingHook;
pub use pipeline::{PipelineBuilder, RequestHook, TelemetryLayer, TelemetryService};
pub use server::HttpServer;
