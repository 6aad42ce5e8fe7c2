//! Telemetry sinks.
//!
//! # Responsibilities
//! - Define the emission contract (`TelemetrySink`)
//! - Render events through `tracing` (`TracingSink`)
//! - Decouple emission from the request task (`ChannelSink`)
//! - Record events for assertions (`MemorySink`)
//!
//! # Design Decisions
//! - `emit` takes the event by value: once emitted it cannot be mutated
//! - Sinks never block the request task beyond their own buffering

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TelemetryError;
use crate::telemetry::event::{EventKind, Severity, TelemetryEvent};
use crate::tracking::Properties;

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn emit(&self, event: TelemetryEvent) {
        (**self).emit(event)
    }
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! emit_at {
    ($macro:ident, $event:expr, $properties:expr) => {
        tracing::$macro!(
            target: "telemetry",
            kind = $event.kind.label(),
            source = $event.source.as_deref().unwrap_or(""),
            correlation_id = $event.correlation_id.as_deref().unwrap_or(""),
            transaction_id = $event.transaction_id.as_deref().unwrap_or(""),
            end_to_end_id = $event.end_to_end_id.as_deref().unwrap_or(""),
            properties = %$properties,
            "{}",
            $event.summary()
        )
    };
}

/// Properties as a JSON object for the `properties` log field.
fn render_properties(properties: &Properties) -> Result<String, TelemetryError> {
    Ok(serde_json::to_string(properties)?)
}

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        let properties = render_properties(&event.properties).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Event properties not rendered");
            String::new()
        });
        match event.severity {
            Severity::Verbose => emit_at!(debug, event, properties),
            Severity::Information => emit_at!(info, event, properties),
            Severity::Warning => emit_at!(warn, event, properties),
            Severity::Error | Severity::Critical => {
                if let EventKind::Exception { chain, .. } = &event.kind {
                    tracing::error!(target: "telemetry", chain = ?chain, "Exception source chain");
                }
                emit_at!(error, event, properties)
            }
        }
    }
}

/// Hands events to a background task that forwards them to an inner sink.
///
/// `emit` never waits: the channel is unbounded and a closed channel just
/// drops the event with a warning.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChannelSink {
    /// Spawn the forwarder. The task ends once every `ChannelSink` clone is
    /// dropped and the queue is drained.
    pub fn new<S>(inner: S) -> (Self, JoinHandle<()>)
    where
        S: TelemetrySink + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                inner.emit(event);
            }
            tracing::debug!("Telemetry forwarder stopped");
        });
        (Self { tx }, handle)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Telemetry forwarder gone, event dropped");
        }
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_properties() {
        let mut properties = Properties::new();
        properties.insert("Request:Method".into(), "GET".into());
        assert_eq!(
            render_properties(&properties).unwrap(),
            r#"{"Request:Method":"GET"}"#
        );
    }

    #[test]
    fn test_memory_sink_records_and_drains() {
        let sink = MemorySink::new();
        sink.emit(TelemetryEvent::event("a"));
        sink.emit(TelemetryEvent::event("b"));

        assert_eq!(sink.len(), 2);
        let drained = sink.take();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let memory = MemorySink::new();
        let (sink, handle) = ChannelSink::new(memory.clone());

        for i in 0..5 {
            sink.emit(TelemetryEvent::metric("n", i as f64));
        }
        drop(sink);
        handle.await.unwrap();

        let values: Vec<f64> = memory
            .events()
            .into_iter()
            .map(|e| match e.kind {
                EventKind::Metric { value, .. } => value,
                _ => -1.0,
            })
            .collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.emit(TelemetryEvent::message(Severity::Critical, "x"));
        TracingSink.emit(TelemetryEvent::message(Severity::Verbose, "y"));
    }
}
