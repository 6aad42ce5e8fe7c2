//! Demo service instrumented with request telemetry.
//!
//! # Routes
//! - `GET  /health`         liveness
//! - `POST /api/echo`       echoes the JSON body
//! - `GET  /api/whoami`     tracking ids of the current request
//! - `GET  /api/dependency` simulated outbound call, tracked as a dependency
//! - `GET  /api/fail`       raises a `Fault`
//! - `GET  /api/panic`      panics inside the handler

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use clap::Parser;
use tokio::net::TcpListener;

use request_telemetry::config::{load_config, ConfigResolver, TelemetrySettings};
use request_telemetry::lifecycle::{signals, Shutdown};
use request_telemetry::observability::{init_logging, metrics};
use request_telemetry::telemetry::{ChannelSink, DependencyTimer, TelemetryClient, TracingSink};
use request_telemetry::{Fault, HttpServer, RequestIdentity, Telemetry};

#[derive(Parser)]
#[command(name = "request-telemetry")]
#[command(about = "Demo HTTP service with request telemetry", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut settings = match &cli.config {
        Some(path) => load_config(path)?,
        None => TelemetrySettings::default(),
    };
    if let Some(bind) = cli.bind {
        settings.listener.bind_address = bind;
    }

    init_logging(&settings.logging.level, settings.logging.format)?;
    tracing::info!("request-telemetry v{} starting", env!("CARGO_PKG_VERSION"));

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let resolver = ConfigResolver::new(settings.clone());
    let config = resolver.resolve()?;

    let (sink, forwarder) = ChannelSink::new(TracingSink);
    let telemetry = Telemetry::new(config, Arc::new(sink));

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&settings.listener.bind_address).await?;
    let server = HttpServer::new(settings, &telemetry, app(telemetry.client().clone()));
    server.run(listener, shutdown.subscribe()).await?;

    // The forwarder exits once the last sink handle is gone.
    drop(telemetry);
    if tokio::time::timeout(Duration::from_secs(5), forwarder).await.is_err() {
        tracing::warn!("Telemetry forwarder did not drain in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn app(client: TelemetryClient) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/echo", post(echo))
        .route("/api/whoami", get(whoami))
        .route("/api/dependency", get(dependency))
        .route("/api/fail", get(fail))
        .route("/api/panic", get(panic_handler))
        .layer(Extension(client))
}

async fn echo(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

async fn whoami(identity: RequestIdentity) -> Json<RequestIdentity> {
    Json(identity)
}

async fn dependency(Extension(client): Extension<TelemetryClient>) -> &'static str {
    let timer = DependencyTimer::start("inventory", "http://inventory.internal", "HTTP", "GET /stock");
    tokio::time::sleep(Duration::from_millis(25)).await;
    timer.complete_with(&client, "200", Some("in stock".to_string()));
    "dependency called"
}

async fn fail() -> Result<&'static str, Fault> {
    Err(Fault::new("boom"))
}

async fn panic_handler() -> &'static str {
    panic!("handler panicked")
}
