//! Telemetry emission gateway.
//!
//! # Data Flow
//! ```text
//! event
//!     → initializers (registration order)
//!     → property size limit
//!     → severity floor (drop + count)
//!     → sink
//! ```

use std::sync::Arc;

use crate::observability::metrics;
use crate::telemetry::event::{Severity, TelemetryEvent};
use crate::telemetry::initializers::TelemetryInitializer;
use crate::telemetry::sink::TelemetrySink;
use crate::tracking::Properties;

/// Default cap on a single property value, in bytes.
pub const DEFAULT_MAX_PROPERTY_SIZE: usize = 8192;

/// Cheap-to-clone handle used by everything that emits telemetry.
#[derive(Clone)]
pub struct TelemetryClient {
    sink: Arc<dyn TelemetrySink>,
    initializers: Arc<Vec<Arc<dyn TelemetryInitializer>>>,
    min_severity: Severity,
    max_property_size: usize,
}

impl TelemetryClient {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            initializers: Arc::new(Vec::new()),
            min_severity: Severity::Verbose,
            max_property_size: DEFAULT_MAX_PROPERTY_SIZE,
        }
    }

    /// Append an initializer. Initializers run in the order they are added.
    pub fn with_initializer(mut self, initializer: impl TelemetryInitializer + 'static) -> Self {
        Arc::make_mut(&mut self.initializers).push(Arc::new(initializer));
        self
    }

    /// Events below `severity` are dropped.
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Longest property value kept, in bytes. `0` disables truncation.
    pub fn with_max_property_size(mut self, max: usize) -> Self {
        self.max_property_size = max;
        self
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Enrich and emit `event`.
    pub fn emit(&self, mut event: TelemetryEvent) {
        for initializer in self.initializers.iter() {
            initializer.initialize(&mut event);
        }

        if self.max_property_size > 0 {
            for value in event.properties.values_mut() {
                truncate_on_char_boundary(value, self.max_property_size);
            }
        }

        if event.severity < self.min_severity {
            metrics::record_dropped();
            return;
        }

        metrics::record_event(event.kind.label(), event.severity.as_str());
        self.sink.emit(event);
    }

    /// Emit a message.
    pub fn log(&self, severity: Severity, text: impl Into<String>, properties: Properties) {
        self.emit(TelemetryEvent::message(severity, text).with_properties(properties));
    }

    /// Emit a named business event.
    pub fn track_event(&self, name: impl Into<String>, properties: Properties) {
        self.emit(TelemetryEvent::event(name).with_properties(properties));
    }

    /// Emit a single metric sample.
    pub fn track_metric(&self, name: impl Into<String>, value: f64, properties: Properties) {
        self.emit(TelemetryEvent::metric(name, value).with_properties(properties));
    }

    /// Emit an exception with its source chain.
    pub fn track_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        properties: Properties,
    ) {
        let type_name = error_type_name(error);
        self.emit(TelemetryEvent::exception(error, type_name).with_properties(properties));
    }
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("initializers", &self.initializers.len())
            .field("min_severity", &self.min_severity)
            .field("max_property_size", &self.max_property_size)
            .finish()
    }
}

/// Best-effort type label from the `Debug` rendering, e.g. `Custom` for
/// `Custom { kind: Other, .. }`.
fn error_type_name(error: &dyn std::error::Error) -> String {
    let debug = format!("{:?}", error);
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(debug.len());
    if end == 0 {
        "Error".to_string()
    } else {
        debug[..end].to_string()
    }
}

fn truncate_on_char_boundary(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::EventKind;
    use crate::telemetry::sink::MemorySink;

    fn client() -> (TelemetryClient, MemorySink) {
        let sink = MemorySink::new();
        (TelemetryClient::new(Arc::new(sink.clone())), sink)
    }

    #[test]
    fn test_initializers_run_in_order() {
        let (client, sink) = client();
        let client = client
            .with_initializer(|e: &mut TelemetryEvent| {
                e.properties.insert("order".into(), "first".into());
            })
            .with_initializer(|e: &mut TelemetryEvent| {
                let prev = e.properties.get("order").cloned().unwrap_or_default();
                e.properties.insert("order".into(), format!("{},second", prev));
            });

        client.track_event("x", Properties::new());
        assert_eq!(sink.events()[0].properties["order"], "first,second");
    }

    #[test]
    fn test_severity_floor_drops() {
        let (client, sink) = client();
        let client = client.with_min_severity(Severity::Warning);

        client.log(Severity::Information, "quiet", Properties::new());
        client.log(Severity::Error, "loud", Properties::new());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary(), "loud");
    }

    #[test]
    fn test_property_truncation_respects_char_boundary() {
        let (client, sink) = client();
        let client = client.with_max_property_size(5);

        let mut props = Properties::new();
        props.insert("k".into(), "abcdé".into()); // 'é' is two bytes, spans 4..6
        props.insert("short".into(), "ok".into());
        client.track_event("x", props);

        let event = &sink.events()[0];
        assert_eq!(event.properties["k"], "abcd");
        assert_eq!(event.properties["short"], "ok");
    }

    #[test]
    fn test_track_metric_and_exception() {
        let (client, sink) = client();
        client.track_metric("latency", 1.5, Properties::new());
        client.track_exception(&std::io::Error::other("boom"), Properties::new());

        let events = sink.take();
        assert!(matches!(events[0].kind, EventKind::Metric { value, .. } if value == 1.5));
        match &events[1].kind {
            EventKind::Exception { error, type_name, .. } => {
                assert_eq!(error, "boom");
                assert_eq!(type_name, "Custom");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
