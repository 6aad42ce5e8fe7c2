//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Header keys must be valid header names; the correlation key is required
//! - Addresses must parse; timeouts must be positive
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TelemetrySettings → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::TelemetrySettings;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `logging.level`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate `settings`, collecting every error.
pub fn validate_config(settings: &TelemetrySettings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", settings.listener.bind_address),
        ));
    }

    if settings.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than zero",
        ));
    }

    let app = &settings.application;
    if app.correlation_id_header_key.trim().is_empty() {
        errors.push(ValidationError::new(
            "application.correlation_id_header_key",
            "must not be empty",
        ));
    }
    for (field, key) in [
        ("application.correlation_id_header_key", &app.correlation_id_header_key),
        ("application.sub_correlation_id_header_key", &app.sub_correlation_id_header_key),
        ("application.transaction_id_header_key", &app.transaction_id_header_key),
        ("application.end_to_end_id_header_key", &app.end_to_end_id_header_key),
    ] {
        let key = key.trim();
        if !key.is_empty() && HeaderName::from_bytes(key.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                field,
                format!("`{}` is not a valid header name", key),
            ));
        }
    }

    let level = settings.logging.level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("`{}` is not one of {}", settings.logging.level, LEVELS.join(", ")),
        ));
    }

    if settings.observability.metrics_enabled
        && settings
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "`{}` is not a socket address",
                settings.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
