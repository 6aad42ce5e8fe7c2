//! Event initializers run by the client before every emission.

use crate::tracking::{current_identity, Properties};
use crate::telemetry::event::TelemetryEvent;

/// Property key carrying the service name.
pub const SERVICE_NAME: &str = "Application:Name";

/// Enriches an event in place before it reaches the sink.
pub trait TelemetryInitializer: Send + Sync {
    fn initialize(&self, event: &mut TelemetryEvent);
}

/// Fills missing tracking ids from the request currently in scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityInitializer;

impl TelemetryInitializer for IdentityInitializer {
    fn initialize(&self, event: &mut TelemetryEvent) {
        let Some(identity) = current_identity() else {
            return;
        };
        event
            .correlation_id
            .get_or_insert_with(|| identity.correlation_id().to_string());
        event
            .transaction_id
            .get_or_insert_with(|| identity.transaction_id().to_string());
        event
            .end_to_end_id
            .get_or_insert_with(|| identity.end_to_end_id().to_string());
    }
}

/// Adds configured static properties without overriding event-specific ones.
#[derive(Debug, Clone, Default)]
pub struct StaticPropertiesInitializer {
    properties: Properties,
}

impl StaticPropertiesInitializer {
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }
}

impl TelemetryInitializer for StaticPropertiesInitializer {
    fn initialize(&self, event: &mut TelemetryEvent) {
        for (key, value) in &self.properties {
            event
                .properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Stamps the service name on every event.
#[derive(Debug, Clone)]
pub struct ServiceNameInitializer {
    name: String,
}

impl ServiceNameInitializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TelemetryInitializer for ServiceNameInitializer {
    fn initialize(&self, event: &mut TelemetryEvent) {
        event
            .properties
            .insert(SERVICE_NAME.to_string(), self.name.clone());
    }
}

impl<F> TelemetryInitializer for F
where
    F: Fn(&mut TelemetryEvent) + Send + Sync,
{
    fn initialize(&self, event: &mut TelemetryEvent) {
        self(event)
    }
}
