//! Request pipeline composed into a single tower layer.
//!
//! # Data Flow
//! ```text
//! request
//!     → hook pre-phases (registration order)
//!     → identity (from extensions, else resolved here)
//!     → downstream service (task-local identity scope, panics caught)
//!         ├─ success → hook post-phases (reverse order, only hooks whose
//!         │            pre-phase succeeded)
//!         └─ fault   → exception pipeline (custom handlers XOR default)
//!     → response
//! ```
//!
//! # Design Decisions
//! - Hook errors are logged and swallowed; telemetry never fails a request
//! - The service itself never errors (`Infallible`), so it layers onto an
//!   axum `Router` directly
//! - Nothing is spawned on the request path

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::{Layer, Service, ServiceExt};

use crate::config::TrackingConfig;
use crate::error::{BoxError, TelemetryError};
use crate::http::exception::{DefaultExceptionHandler, ExceptionHandler, ExceptionPipeline, Fault};
use crate::observability::metrics;
use crate::telemetry::TelemetryClient;
use crate::tracking::identity::scope;
use crate::tracking::{IdentifierResolver, RequestIdentity, RequestSnapshot};

/// A pre/post callback pair wrapped around downstream handling.
///
/// `after` only runs when `before` succeeded and downstream did not fault.
pub trait RequestHook: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    fn before<'a>(&'a self, request: &'a mut Request<Body>) -> BoxFuture<'a, Result<(), TelemetryError>>;

    fn after<'a>(
        &'a self,
        request: &'a RequestSnapshot,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), TelemetryError>>;
}

/// Assembles hooks and exception handlers into a [`TelemetryLayer`].
pub struct PipelineBuilder {
    resolver: IdentifierResolver,
    hooks: Vec<Arc<dyn RequestHook>>,
    handlers: Vec<Arc<dyn ExceptionHandler>>,
    default_handler: DefaultExceptionHandler,
}

impl PipelineBuilder {
    pub fn new(config: &TrackingConfig, client: TelemetryClient) -> Self {
        Self {
            resolver: config.identifier_resolver(),
            hooks: Vec::new(),
            handlers: Vec::new(),
            default_handler: DefaultExceptionHandler::new(
                config.header_keys.clone(),
                config.metadata_extractor(),
                client,
            ),
        }
    }

    /// Register a hook. Pre-phases run in registration order, post-phases in
    /// reverse.
    pub fn hook(mut self, hook: impl RequestHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Register a custom exception handler. Once any is registered the
    /// default handler no longer runs.
    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> TelemetryLayer {
        tracing::debug!(
            hooks = self.hooks.len(),
            exception_handlers = self.handlers.len(),
            "Telemetry pipeline built"
        );
        TelemetryLayer {
            pipeline: Arc::new(Pipeline {
                resolver: self.resolver,
                hooks: self.hooks,
                exceptions: ExceptionPipeline::new(self.handlers, self.default_handler),
            }),
        }
    }
}

struct Pipeline {
    resolver: IdentifierResolver,
    hooks: Vec<Arc<dyn RequestHook>>,
    exceptions: ExceptionPipeline,
}

impl Pipeline {
    async fn run<S>(&self, inner: S, mut request: Request<Body>) -> Response
    where
        S: Service<Request<Body>, Response = Response> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let method = request.method().clone();

        // 1. Pre-phases
        let mut entered = Vec::with_capacity(self.hooks.len());
        for (index, hook) in self.hooks.iter().enumerate() {
            match hook.before(&mut request).await {
                Ok(()) => entered.push(index),
                Err(e) => tracing::warn!(hook = hook.name(), error = %e, "Request hook failed"),
            }
        }

        // 2. Identity
        let identity = match request.extensions().get::<RequestIdentity>() {
            Some(identity) => identity.clone(),
            None => {
                let identity = self.resolver.resolve(request.headers()).identity;
                request.extensions_mut().insert(identity.clone());
                identity
            }
        };
        let snapshot = RequestSnapshot::capture(&request);

        // 3. Downstream, then post-phases or the exception pipeline
        let response = scope(identity.clone(), async {
            match settle(AssertUnwindSafe(inner.oneshot(request)).catch_unwind().await) {
                Ok(mut response) => {
                    for &index in entered.iter().rev() {
                        let hook = &self.hooks[index];
                        if let Err(e) = hook.after(&snapshot, &mut response).await {
                            tracing::warn!(hook = hook.name(), error = %e, "Response hook failed");
                        }
                    }
                    response
                }
                Err(fault) => {
                    tracing::error!(
                        correlation_id = identity.correlation_id(),
                        kind = ?fault.kind(),
                        error = %fault,
                        path = snapshot.path(),
                        "Unhandled fault"
                    );
                    self.exceptions.handle(&fault, &snapshot, &identity)
                }
            }
        })
        .await;

        metrics::record_request(method.as_str(), response.status().as_u16(), start);
        response
    }
}

/// Collapse the downstream outcome: a service error, a panic, or a
/// response carrying a `Fault` extension all count as faults.
fn settle<E>(outcome: Result<Result<Response, E>, Box<dyn Any + Send>>) -> Result<Response, Fault>
where
    E: Into<BoxError>,
{
    match outcome {
        Ok(Ok(mut response)) => match response.extensions_mut().remove::<Fault>() {
            Some(fault) => Err(fault),
            None => Ok(response),
        },
        Ok(Err(e)) => Err(Fault::from_service_error(e.into())),
        Err(payload) => Err(Fault::from_panic(payload)),
    }
}

/// Tower layer applying the telemetry pipeline.
#[derive(Clone)]
pub struct TelemetryLayer {
    pipeline: Arc<Pipeline>,
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Service produced by [`TelemetryLayer`].
#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

impl<S> Service<Request<Body>> for TelemetryService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is awaited per call via `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = self.pipeline.clone();
        Box::pin(async move { Ok(pipeline.run(inner, request).await) })
    }
}
