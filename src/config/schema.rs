//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! telemetry service. All types derive Serde traits for deserialization
//! from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;
use crate::telemetry::client::DEFAULT_MAX_PROPERTY_SIZE;
use crate::tracking::identity::{
    DEFAULT_CORRELATION_ID_HEADER, DEFAULT_END_TO_END_ID_HEADER,
    DEFAULT_SUB_CORRELATION_ID_HEADER, DEFAULT_TRANSACTION_ID_HEADER,
};
use crate::tracking::metadata::DEFAULT_MAX_BODY_SIZE;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Service identity and tracking header keys.
    pub application: ApplicationConfig,

    /// Request logging behaviour.
    pub logging: LoggingConfig,

    /// Metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Service name and the headers carrying tracking identifiers.
///
/// A blank key disables reading and echoing that identifier. The
/// correlation key cannot be blank.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    pub correlation_id_header_key: String,
    pub sub_correlation_id_header_key: String,
    pub transaction_id_header_key: String,
    pub end_to_end_id_header_key: String,

    /// Issue a new sub-correlation id per hop instead of honoring the
    /// inbound one.
    pub regenerate_sub_correlation_id: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            correlation_id_header_key: DEFAULT_CORRELATION_ID_HEADER.to_string(),
            sub_correlation_id_header_key: DEFAULT_SUB_CORRELATION_ID_HEADER.to_string(),
            transaction_id_header_key: DEFAULT_TRANSACTION_ID_HEADER.to_string(),
            end_to_end_id_header_key: DEFAULT_END_TO_END_ID_HEADER.to_string(),
            regenerate_sub_correlation_id: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). Also the telemetry
    /// severity floor.
    pub level: String,

    /// Output format for the process log.
    pub format: LogFormat,

    /// Emit request/response messages for every request.
    pub verbose: bool,

    /// Capture request bodies (never for GET, HEAD, TRACE).
    pub request_body: bool,

    /// Capture response bodies.
    pub response_body: bool,

    /// Comma-separated header names whose values are masked.
    /// `Authorization` is always masked.
    pub redacted_headers: String,

    /// Longest property value kept, in bytes. `0` disables truncation.
    pub max_property_size: usize,

    /// Body bytes buffered for telemetry per request or response. Larger
    /// bodies are still forwarded whole. `0` disables the cap.
    pub max_body_size: usize,

    /// Static properties stamped on every event.
    pub custom_properties: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            verbose: false,
            request_body: false,
            response_body: false,
            redacted_headers: String::new(),
            max_property_size: DEFAULT_MAX_PROPERTY_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            custom_properties: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Verbose request logging is on when asked for explicitly or implied
    /// by a trace/debug level.
    pub fn verbose_enabled(&self) -> bool {
        self.verbose
            || matches!(
                self.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug"
            )
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings: TelemetrySettings = toml::from_str("").unwrap();
        assert_eq!(settings.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(settings.application.correlation_id_header_key, "x-correlation-id");
        assert!(settings.application.regenerate_sub_correlation_id);
        assert_eq!(settings.logging.max_property_size, 8192);
        assert_eq!(settings.logging.max_body_size, 64 * 1024);
        assert!(!settings.logging.verbose_enabled());
    }

    #[test]
    fn test_partial_sections() {
        let settings: TelemetrySettings = toml::from_str(
            r#"
            [logging]
            level = "debug"
            format = "json"
            redacted_headers = "X-Api-Key"

            [logging.custom_properties]
            Region = "eu-west"

            [application]
            transaction_id_header_key = ""
            "#,
        )
        .unwrap();

        assert!(settings.logging.verbose_enabled());
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.custom_properties["Region"], "eu-west");
        assert_eq!(settings.application.transaction_id_header_key, "");
        assert_eq!(settings.application.end_to_end_id_header_key, "x-end-to-end-id");
    }
}
