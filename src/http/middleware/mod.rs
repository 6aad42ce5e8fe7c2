//! Request hooks plugged into the telemetry pipeline.

pub mod tracking;

pub use tracking::TrackingHook;
