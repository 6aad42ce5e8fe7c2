//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap an application `Router` in the telemetry pipeline
//! - Wire up middleware (timeout, sensitive headers, tracing)
//! - Bind server to listener and stop on the shutdown signal

use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{sensitive_headers::SetSensitiveHeadersLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{TelemetrySettings, TrackingConfig};
use crate::http::pipeline::TelemetryLayer;
use crate::runtime::Telemetry;

/// HTTP server hosting an instrumented application.
pub struct HttpServer {
    router: Router,
    settings: TelemetrySettings,
}

impl HttpServer {
    /// Instrument `app` with the default pipeline of `telemetry`.
    pub fn new(settings: TelemetrySettings, telemetry: &Telemetry, app: Router) -> Self {
        let layer = telemetry.pipeline().build();
        Self::with_layer(settings, telemetry.config(), layer, app)
    }

    /// Instrument `app` with a pipeline assembled by the caller, e.g. one
    /// with custom exception handlers.
    pub fn with_layer(
        settings: TelemetrySettings,
        config: &TrackingConfig,
        layer: TelemetryLayer,
        app: Router,
    ) -> Self {
        let router = Self::build_router(&settings, config, layer, app);
        Self { router, settings }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Outermost first: sensitive-header marking, request tracing,
    /// telemetry pipeline, timeout, application.
    #[allow(deprecated)]
    fn build_router(
        settings: &TelemetrySettings,
        config: &TrackingConfig,
        layer: TelemetryLayer,
        app: Router,
    ) -> Router {
        app.layer(TimeoutLayer::new(Duration::from_secs(settings.timeouts.request_secs)))
            .layer(layer)
            .layer(TraceLayer::new_for_http())
            .layer(SetSensitiveHeadersLayer::new(config.redaction.header_names()))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.settings.timeouts.request_secs,
            "HTTP server starting"
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }
}
