//! Error types for the telemetry pipeline itself.
//!
//! These never reach a client: every pipeline stage catches its own
//! `TelemetryError`, logs it as a diagnostic and lets the request continue.

use axum::http::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

/// Boxed error accepted from downstream services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while tracking or enriching a request.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A tracking identifier could not be encoded as a header value.
    #[error("identifier for header `{header}` is not a valid header value")]
    HeaderValue {
        header: String,
        #[source]
        source: InvalidHeaderValue,
    },

    /// A configured header key is not a valid header name.
    #[error("`{key}` is not a valid header name")]
    HeaderName {
        key: String,
        #[source]
        source: InvalidHeaderName,
    },

    /// The correlation id header key is blank.
    #[error("correlation id header key must not be empty")]
    MissingCorrelationKey,

    /// Buffering a request or response body failed.
    #[error("failed to buffer {which} body")]
    BodyRead {
        which: &'static str,
        #[source]
        source: axum::Error,
    },

    /// Event properties could not be rendered for logging.
    #[error("failed to serialize payload")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use std::error::Error as _;

    #[test]
    fn test_header_value_error_keeps_source() {
        let source = HeaderValue::from_str("bad\nvalue").unwrap_err();
        let err = TelemetryError::HeaderValue {
            header: "x-correlation-id".into(),
            source,
        };
        assert_eq!(
            err.to_string(),
            "identifier for header `x-correlation-id` is not a valid header value"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_header_name_error_message() {
        let source = HeaderName::from_bytes(b"bad header").unwrap_err();
        let err = TelemetryError::HeaderName {
            key: "bad header".into(),
            source,
        };
        assert_eq!(err.to_string(), "`bad header` is not a valid header name");
    }
}
