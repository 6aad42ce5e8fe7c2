//! Structured telemetry events.
//!
//! An event is built, enriched by initializers, then moved into a sink
//! exactly once. Nothing can touch it after emission.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tracking::{Properties, RequestIdentity};

/// Event severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Map a log level name onto a severity.
    ///
    /// `trace` and `debug` both collapse into `Verbose`. Unknown names are
    /// treated as `Verbose` so nothing is silently filtered.
    pub fn from_level_str(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "info" | "information" => Severity::Information,
            "warn" | "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" | "fatal" => Severity::Critical,
            _ => Severity::Verbose,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "verbose",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        text: String,
    },
    Exception {
        error: String,
        type_name: String,
        /// Messages of the error's source chain, outermost first.
        chain: Vec<String>,
    },
    Dependency {
        name: String,
        target: String,
        dependency_type: String,
        command: String,
        #[serde(with = "duration_millis")]
        duration: Duration,
        success: bool,
        result_code: String,
        response: Option<String>,
    },
    Metric {
        name: String,
        value: f64,
    },
    Event {
        name: String,
    },
}

impl EventKind {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Message { .. } => "message",
            EventKind::Exception { .. } => "exception",
            EventKind::Dependency { .. } => "dependency",
            EventKind::Metric { .. } => "metric",
            EventKind::Event { .. } => "event",
        }
    }
}

/// A single structured telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub correlation_id: Option<String>,
    pub transaction_id: Option<String>,
    pub end_to_end_id: Option<String>,
    /// Component that raised the event, e.g. `ExceptionMiddleware`.
    pub source: Option<String>,
    pub properties: Properties,
    pub kind: EventKind,
}

impl TelemetryEvent {
    pub fn new(severity: Severity, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            correlation_id: None,
            transaction_id: None,
            end_to_end_id: None,
            source: None,
            properties: Properties::new(),
            kind,
        }
    }

    pub fn message(severity: Severity, text: impl Into<String>) -> Self {
        Self::new(severity, EventKind::Message { text: text.into() })
    }

    /// Exception event for `error`, capturing its full source chain.
    pub fn exception(error: &(dyn std::error::Error + 'static), type_name: impl Into<String>) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self::new(
            Severity::Error,
            EventKind::Exception {
                error: error.to_string(),
                type_name: type_name.into(),
                chain,
            },
        )
    }

    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self::new(
            Severity::Information,
            EventKind::Metric {
                name: name.into(),
                value,
            },
        )
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::new(Severity::Information, EventKind::Event { name: name.into() })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_identity(mut self, identity: &RequestIdentity) -> Self {
        self.correlation_id = Some(identity.correlation_id().to_string());
        self.transaction_id = Some(identity.transaction_id().to_string());
        self.end_to_end_id = Some(identity.end_to_end_id().to_string());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Text for the log line, regardless of kind.
    pub fn summary(&self) -> String {
        match &self.kind {
            EventKind::Message { text } => text.clone(),
            EventKind::Exception { error, type_name, .. } => format!("{}: {}", type_name, error),
            EventKind::Dependency {
                name,
                target,
                success,
                ..
            } => format!("{} -> {} ({})", name, target, if *success { "ok" } else { "failed" }),
            EventKind::Metric { name, value } => format!("{} = {}", name, value),
            EventKind::Event { name } => name.clone(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}
