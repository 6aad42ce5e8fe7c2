//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};

use request_telemetry::config::TrackingConfig;
use request_telemetry::telemetry::{EventKind, MemorySink, TelemetryEvent};
use request_telemetry::{Fault, RequestIdentity, Telemetry};

/// Telemetry recording into memory.
pub fn telemetry(config: TrackingConfig) -> (Telemetry, MemorySink) {
    let sink = MemorySink::new();
    let telemetry = Telemetry::new(Arc::new(config), Arc::new(sink.clone()));
    (telemetry, sink)
}

/// Routes exercising every outcome the pipeline distinguishes.
pub fn app() -> Router {
    Router::new()
        .route("/api/items", get(|| async { "items" }))
        .route("/api/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/api/echo",
            post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
        )
        .route(
            "/api/whoami",
            get(|identity: RequestIdentity| async move { Json(identity) }),
        )
        .route("/api/boom", get(|| async { Err::<&'static str, _>(Fault::new("boom")) }))
        .route(
            "/api/preset",
            get(|| async {
                (
                    [("x-correlation-id", "downstream-wins")],
                    "preset",
                )
            }),
        )
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Messages recorded by `sink`, in emission order.
pub fn messages(sink: &MemorySink) -> Vec<TelemetryEvent> {
    sink.events()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::Message { .. }))
        .collect()
}

/// Exceptions recorded by `sink`.
pub fn exceptions(sink: &MemorySink) -> Vec<TelemetryEvent> {
    sink.events()
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::Exception { .. }))
        .collect()
}

/// Wait until something accepts connections on `addr`.
pub async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server on {} did not start", addr);
}
