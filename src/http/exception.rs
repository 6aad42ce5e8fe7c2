//! Unhandled fault handling.
//!
//! # Responsibilities
//! - Represent anything that escaped a handler (`Fault`)
//! - Run registered `ExceptionHandler`s in registration order
//! - Fall back to the default handler only when none are registered
//!
//! # Design Decisions
//! - Custom handlers and the default handler are mutually exclusive
//! - A failing or panicking custom handler is logged and skipped; the
//!   remaining handlers still run
//! - The request identity is reused, never regenerated

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::ext::ReasonPhrase;
use thiserror::Error;

use crate::error::BoxError;
use crate::observability::metrics;
use crate::telemetry::{EventKind, Severity, TelemetryClient, TelemetryEvent};
use crate::tracking::{HeaderKeys, MetadataExtractor, RequestIdentity, RequestSnapshot};

/// Event source of the default handler.
pub const EXCEPTION_SOURCE: &str = "ExceptionMiddleware";

/// Reason phrase on the default 500 response.
pub const UNHANDLED_REASON: &[u8] = b"Unhandled Exception occurred";

/// How a fault reached the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A handler returned `Err(Fault)`.
    Raised,
    /// The downstream future panicked.
    Panic,
    /// The inner service returned an error.
    Service,
}

/// An unhandled failure from downstream.
///
/// Handlers raise one by returning `Result<_, Fault>`:
///
/// ```text
/// async fn charge() -> Result<Json<Receipt>, Fault> {
///     let receipt = gateway.charge().await.map_err(|e| Fault::from_error(&e))?;
///     Ok(Json(receipt))
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
    type_name: String,
    kind: FaultKind,
    chain: Vec<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_name: "Fault".to_string(),
            kind: FaultKind::Raised,
            chain: Vec::new(),
        }
    }

    /// Capture `error` and its source chain.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            type_name: "Error".to_string(),
            kind: FaultKind::Raised,
            chain,
        }
    }

    pub fn from_service_error(error: BoxError) -> Self {
        Self {
            kind: FaultKind::Service,
            ..Self::from_error(error.as_ref())
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self {
            message,
            type_name: "Panic".to_string(),
            kind: FaultKind::Panic,
            chain: Vec::new(),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

impl IntoResponse for Fault {
    /// The body is a placeholder; the telemetry layer spots the `Fault`
    /// extension and replaces the whole response.
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Recovery hook for unhandled faults.
///
/// Handlers start from an empty 500 response and may reshape it freely.
pub trait ExceptionHandler: Send + Sync {
    fn handle(
        &self,
        fault: &Fault,
        request: &RequestSnapshot,
        response: &mut Response,
        correlation_id: &str,
        transaction_id: &str,
    ) -> Result<(), BoxError>;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&Fault, &RequestSnapshot, &mut Response, &str, &str) -> Result<(), BoxError>
        + Send
        + Sync,
{
    fn handle(
        &self,
        fault: &Fault,
        request: &RequestSnapshot,
        response: &mut Response,
        correlation_id: &str,
        transaction_id: &str,
    ) -> Result<(), BoxError> {
        self(fault, request, response, correlation_id, transaction_id)
    }
}

/// Response and telemetry used when no custom handler is registered.
#[derive(Debug, Clone)]
pub struct DefaultExceptionHandler {
    keys: HeaderKeys,
    extractor: MetadataExtractor,
    client: TelemetryClient,
}

impl DefaultExceptionHandler {
    pub fn new(keys: HeaderKeys, extractor: MetadataExtractor, client: TelemetryClient) -> Self {
        Self {
            keys,
            extractor,
            client,
        }
    }

    pub fn respond(
        &self,
        fault: &Fault,
        request: &RequestSnapshot,
        identity: &RequestIdentity,
    ) -> Response {
        let body = format!(
            "OOPS! Something went wrong. Please contact support with tracking ID {}.",
            identity.correlation_id()
        );
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response.extensions_mut().insert(ReasonPhrase::from_static(UNHANDLED_REASON));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        let echoed = [
            (Some(&self.keys.correlation_id), identity.correlation_id()),
            (self.keys.transaction_id.as_ref(), identity.transaction_id()),
        ];
        for (key, value) in echoed {
            let Some(key) = key else { continue };
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    response.headers_mut().insert(key.clone(), v);
                }
                Err(e) => tracing::warn!(header = %key, error = %e, "Tracking id not echoed"),
            }
        }

        let event = TelemetryEvent::new(
            Severity::Error,
            EventKind::Exception {
                error: fault.message().to_string(),
                type_name: fault.type_name().to_string(),
                chain: fault.chain().to_vec(),
            },
        )
        .with_source(EXCEPTION_SOURCE)
        .with_identity(identity)
        .with_properties(self.extractor.snapshot_properties(request));
        self.client.emit(event);

        response
    }
}

/// Ordered custom handlers plus the default fallback.
#[derive(Clone)]
pub struct ExceptionPipeline {
    handlers: Vec<Arc<dyn ExceptionHandler>>,
    default: DefaultExceptionHandler,
}

impl ExceptionPipeline {
    pub fn new(handlers: Vec<Arc<dyn ExceptionHandler>>, default: DefaultExceptionHandler) -> Self {
        Self { handlers, default }
    }

    /// Produce the response for `fault`.
    pub fn handle(
        &self,
        fault: &Fault,
        request: &RequestSnapshot,
        identity: &RequestIdentity,
    ) -> Response {
        if self.handlers.is_empty() {
            metrics::record_fault("default");
            return self.default.respond(fault, request, identity);
        }

        metrics::record_fault("custom");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;

        for (index, handler) in self.handlers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                handler.handle(
                    fault,
                    request,
                    &mut response,
                    identity.correlation_id(),
                    identity.transaction_id(),
                )
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    handler = index,
                    correlation_id = identity.correlation_id(),
                    error = %e,
                    "Exception handler failed"
                ),
                Err(payload) => {
                    let panic = Fault::from_panic(payload);
                    tracing::error!(
                        handler = index,
                        correlation_id = identity.correlation_id(),
                        panic = panic.message(),
                        "Exception handler panicked"
                    );
                }
            }
        }
        response
    }
}

impl std::fmt::Debug for ExceptionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionPipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
