//! Process-wide telemetry handle.
//!
//! # Design Decisions
//! - Initialized at most once; concurrent initializers all get the same
//!   instance (check, lock, check again, set)
//! - Reads after initialization are lock-free
//! - Reset exists only for test harnesses

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;

use crate::config::TrackingConfig;
use crate::http::middleware::TrackingHook;
use crate::http::pipeline::PipelineBuilder;
use crate::telemetry::{
    IdentityInitializer, ServiceNameInitializer, StaticPropertiesInitializer, TelemetryClient,
    TelemetrySink,
};

/// Resolved configuration plus the client every component emits through.
#[derive(Debug, Clone)]
pub struct Telemetry {
    config: Arc<TrackingConfig>,
    client: TelemetryClient,
}

impl Telemetry {
    /// Build the client for `config` with the standard initializers:
    /// request identity, custom properties, then service name.
    pub fn new(config: Arc<TrackingConfig>, sink: Arc<dyn TelemetrySink>) -> Self {
        let client = TelemetryClient::new(sink)
            .with_initializer(IdentityInitializer)
            .with_initializer(StaticPropertiesInitializer::new(config.custom_properties.clone()))
            .with_initializer(ServiceNameInitializer::new(config.service_name.clone()))
            .with_min_severity(config.effective_min_severity())
            .with_max_property_size(config.max_property_size);
        Self { config, client }
    }

    /// Use a client assembled by the caller, e.g. with extra initializers.
    pub fn with_client(config: Arc<TrackingConfig>, client: TelemetryClient) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &Arc<TrackingConfig> {
        &self.config
    }

    pub fn client(&self) -> &TelemetryClient {
        &self.client
    }

    /// Pipeline builder with the tracking hook already registered.
    pub fn pipeline(&self) -> PipelineBuilder {
        PipelineBuilder::new(&self.config, self.client.clone())
            .hook(TrackingHook::new(&self.config, self.client.clone()))
    }
}

static GLOBAL: Lazy<ArcSwapOption<Telemetry>> = Lazy::new(ArcSwapOption::empty);
static INIT: Mutex<()> = Mutex::new(());

/// The global handle, if initialized.
pub fn global() -> Option<Arc<Telemetry>> {
    GLOBAL.load_full()
}

/// Initialize the global handle with `init`, or return the existing one.
/// `init` runs at most once per process.
pub fn init_global<F>(init: F) -> Arc<Telemetry>
where
    F: FnOnce() -> Telemetry,
{
    match try_init_global(|| Ok::<_, std::convert::Infallible>(init())) {
        Ok(telemetry) => telemetry,
        Err(never) => match never {},
    }
}

/// Fallible form of [`init_global`]. A failed `init` leaves the handle unset.
pub fn try_init_global<F, E>(init: F) -> Result<Arc<Telemetry>, E>
where
    F: FnOnce() -> Result<Telemetry, E>,
{
    if let Some(existing) = GLOBAL.load_full() {
        return Ok(existing);
    }

    let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = GLOBAL.load_full() {
        return Ok(existing);
    }

    let telemetry = Arc::new(init()?);
    GLOBAL.store(Some(telemetry.clone()));
    tracing::debug!("Global telemetry initialized");
    Ok(telemetry)
}

/// Clear the global handle.
#[cfg(any(test, feature = "test-util"))]
pub fn reset_global() {
    let _guard = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    GLOBAL.store(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::telemetry::{MemorySink, Severity, TelemetryEvent};

    fn telemetry(sink: &MemorySink) -> Telemetry {
        Telemetry::new(Arc::new(TrackingConfig::default()), Arc::new(sink.clone()))
    }

    #[test]
    fn test_standard_initializers() {
        let sink = MemorySink::new();
        let mut config = TrackingConfig::default();
        config.service_name = "orders".into();
        config.custom_properties.insert("Region".into(), "eu".into());
        let telemetry = Telemetry::new(Arc::new(config), Arc::new(sink.clone()));

        telemetry.client().emit(TelemetryEvent::event("x"));

        let event = &sink.events()[0];
        assert_eq!(event.properties["Application:Name"], "orders");
        assert_eq!(event.properties["Region"], "eu");
    }

    #[test]
    fn test_verbose_config_keeps_verbose_messages() {
        let sink = MemorySink::new();
        let config = TrackingConfig {
            verbose: true,
            ..TrackingConfig::default()
        };
        let telemetry = Telemetry::new(Arc::new(config), Arc::new(sink.clone()));

        telemetry
            .client()
            .emit(TelemetryEvent::message(Severity::Verbose, "[Request] GET /"));

        assert_eq!(sink.len(), 1);
    }

    // Single test so the process-wide state is not shared between cases.
    #[test]
    fn test_global_lifecycle() {
        reset_global();
        assert!(global().is_none());

        let calls = Arc::new(AtomicUsize::new(0));
        let sink = MemorySink::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let calls = calls.clone();
                let sink = sink.clone();
                std::thread::spawn(move || {
                    init_global(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        telemetry(&sink)
                    })
                })
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(Arc::ptr_eq(&instances[0], &global().unwrap()));

        let failed: Result<_, &str> = try_init_global(|| Err("ignored"));
        assert!(failed.is_ok());

        reset_global();
        let failed: Result<_, &str> = try_init_global(|| Err("bad config"));
        assert_eq!(failed.unwrap_err(), "bad config");
        assert!(global().is_none());
    }
}
