//! Request tracking hook.
//!
//! # Responsibilities
//! - Make sure every tracking id is present on the request
//! - Verbose-log request and response metadata
//! - Mirror tracking ids onto the response
//!
//! # Design Decisions
//! - Ids already on the response are left alone (first writer wins)
//! - Blank header keys are never read, written or echoed

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::TrackingConfig;
use crate::error::TelemetryError;
use crate::http::pipeline::RequestHook;
use crate::telemetry::{Severity, TelemetryClient, TelemetryEvent};
use crate::tracking::{
    current_identity, IdentifierKind, IdentifierResolver, MetadataExtractor, RequestSnapshot,
};

/// Event source of tracking messages.
pub const TRACKING_SOURCE: &str = "TrackingMiddleware";

/// Resolves tracking ids before downstream and echoes them afterwards.
#[derive(Debug, Clone)]
pub struct TrackingHook {
    resolver: IdentifierResolver,
    extractor: MetadataExtractor,
    client: TelemetryClient,
    verbose: bool,
    capture_request_body: bool,
}

impl TrackingHook {
    pub fn new(config: &TrackingConfig, client: TelemetryClient) -> Self {
        Self {
            resolver: config.identifier_resolver(),
            extractor: config.metadata_extractor(),
            client,
            verbose: config.verbose,
            capture_request_body: config.request_body,
        }
    }

    async fn before_request(&self, request: &mut Request<Body>) -> Result<(), TelemetryError> {
        let resolution = self.resolver.resolve(request.headers());
        let identity = resolution.identity;

        for kind in &resolution.generated {
            let Some(key) = self.resolver.keys().get(*kind) else {
                continue;
            };
            let value = HeaderValue::from_str(identity.get(*kind)).map_err(|source| {
                TelemetryError::HeaderValue {
                    header: key.to_string(),
                    source,
                }
            })?;
            request.headers_mut().insert(key.clone(), value);
        }

        if !resolution.generated.is_empty() {
            tracing::debug!(
                correlation_id = identity.correlation_id(),
                generated = ?resolution.generated.iter().map(IdentifierKind::label).collect::<Vec<_>>(),
                "Tracking ids generated"
            );
        }

        request.extensions_mut().insert(identity.clone());

        // Buffering here also makes the body visible to later snapshots.
        if self.verbose || self.capture_request_body {
            let properties = self.extractor.extract_request_properties(request).await;
            if self.verbose {
                let text = format!("[Request] {} {}", request.method(), request.uri().path());
                self.client.emit(
                    TelemetryEvent::message(Severity::Verbose, text)
                        .with_source(TRACKING_SOURCE)
                        .with_identity(&identity)
                        .with_properties(properties),
                );
            }
        }
        Ok(())
    }

    async fn after_response(
        &self,
        request: &RequestSnapshot,
        response: &mut Response,
    ) -> Result<(), TelemetryError> {
        let scoped = current_identity();

        for kind in IdentifierKind::ALL {
            let Some(key) = self.resolver.keys().get(kind) else {
                continue;
            };
            if response.headers().contains_key(key) {
                continue;
            }
            let value = self
                .resolver
                .existing(&request.headers, kind)
                .or_else(|| scoped.as_ref().map(|id| id.get(kind).to_string()));
            if let Some(value) = value {
                let value = HeaderValue::from_str(&value).map_err(|source| {
                    TelemetryError::HeaderValue {
                        header: key.to_string(),
                        source,
                    }
                })?;
                response.headers_mut().insert(key.clone(), value);
            }
        }

        if self.verbose || self.extractor.captures_response_body() {
            let mut properties = self.extractor.snapshot_properties(request);
            properties.extend(self.extractor.extract_response_properties(response).await);

            let mut event = TelemetryEvent::message(
                Severity::Verbose,
                format!("[Response] {} {}", request.method, request.path()),
            )
            .with_source(TRACKING_SOURCE)
            .with_properties(properties);
            if let Some(identity) = &scoped {
                event = event.with_identity(identity);
            }
            self.client.emit(event);
        }
        Ok(())
    }
}

impl RequestHook for TrackingHook {
    fn name(&self) -> &'static str {
        TRACKING_SOURCE
    }

    fn before<'a>(&'a self, request: &'a mut Request<Body>) -> BoxFuture<'a, Result<(), TelemetryError>> {
        Box::pin(self.before_request(request))
    }

    fn after<'a>(
        &'a self,
        request: &'a RequestSnapshot,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), TelemetryError>> {
        Box::pin(self.after_response(request, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::HeaderMap;

    use crate::telemetry::{EventKind, MemorySink};
    use crate::tracking::identity::scope;
    use crate::tracking::RequestIdentity;

    fn hook(config: TrackingConfig) -> (TrackingHook, MemorySink) {
        let sink = MemorySink::new();
        let client = TelemetryClient::new(Arc::new(sink.clone()));
        (TrackingHook::new(&config, client), sink)
    }

    fn text(event: &TelemetryEvent) -> &str {
        match &event.kind {
            EventKind::Message { text } => text,
            _ => "",
        }
    }

    #[tokio::test]
    async fn test_before_writes_generated_ids() {
        let (hook, sink) = hook(TrackingConfig::default());
        let mut req = Request::builder()
            .uri("/orders")
            .header("x-correlation-id", "abc-123")
            .body(Body::empty())
            .unwrap();

        hook.before(&mut req).await.unwrap();

        let headers = req.headers();
        assert_eq!(headers["x-correlation-id"], "abc-123");
        assert_eq!(headers["x-transaction-id"].len(), 36);
        assert_eq!(headers["x-end-to-end-id"].len(), 36);

        let identity = req.extensions().get::<RequestIdentity>().unwrap();
        assert_eq!(identity.correlation_id(), "abc-123");
        assert_eq!(headers["x-transaction-id"], identity.transaction_id());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_verbose_request_message() {
        let config = TrackingConfig {
            verbose: true,
            ..TrackingConfig::default()
        };
        let (hook, sink) = hook(config);
        let mut req = Request::builder()
            .method("DELETE")
            .uri("/orders/7")
            .body(Body::empty())
            .unwrap();

        hook.before(&mut req).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(text(&events[0]), "[Request] DELETE /orders/7");
        assert_eq!(events[0].severity, Severity::Verbose);
        assert_eq!(events[0].source.as_deref(), Some(TRACKING_SOURCE));
        assert_eq!(events[0].properties["Request:Method"], "DELETE");
    }

    #[tokio::test]
    async fn test_after_mirrors_without_overwriting() {
        let (hook, _) = hook(TrackingConfig::default());
        let mut req = Request::builder()
            .uri("/")
            .header("x-correlation-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        hook.before(&mut req).await.unwrap();
        let snapshot = RequestSnapshot::capture(&req);

        let mut response = Response::new(Body::empty());
        response
            .headers_mut()
            .insert("x-transaction-id", HeaderValue::from_static("set-by-handler"));

        hook.after(&snapshot, &mut response).await.unwrap();

        let headers: &HeaderMap = response.headers();
        assert_eq!(headers["x-correlation-id"], "abc-123");
        assert_eq!(headers["x-transaction-id"], "set-by-handler");
        assert_eq!(
            headers["x-sub-correlation-id"],
            snapshot.headers["x-sub-correlation-id"]
        );
    }

    #[tokio::test]
    async fn test_blank_key_not_echoed() {
        let mut config = TrackingConfig::default();
        config.header_keys.end_to_end_id = None;
        let (hook, _) = hook(config);

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        hook.before(&mut req).await.unwrap();
        assert!(req.headers().get("x-end-to-end-id").is_none());

        let snapshot = RequestSnapshot::capture(&req);
        let mut response = Response::new(Body::empty());
        hook.after(&snapshot, &mut response).await.unwrap();
        assert!(response.headers().get("x-end-to-end-id").is_none());
        assert!(response.headers().get("x-correlation-id").is_some());
    }

    #[tokio::test]
    async fn test_response_message_with_body() {
        let config = TrackingConfig {
            response_body: true,
            ..TrackingConfig::default()
        };
        let (hook, sink) = hook(config);
        let mut req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        hook.before(&mut req).await.unwrap();
        let snapshot = RequestSnapshot::capture(&req);
        let identity = req.extensions().get::<RequestIdentity>().cloned().unwrap();

        let mut response = Response::new(Body::from("\"pong\""));
        scope(identity.clone(), hook.after(&snapshot, &mut response))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(text(&events[0]), "[Response] GET /ping");
        assert_eq!(events[0].properties["Response:Body"], "pong");
        assert_eq!(events[0].properties["Response:StatusCode"], "200");
        assert_eq!(
            events[0].correlation_id.as_deref(),
            Some(identity.correlation_id())
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"\"pong\"");
    }
}
