//! Request and response metadata extraction.
//!
//! # Responsibilities
//! - Flatten a request/response into a `Properties` map for telemetry
//! - Redact sensitive header values
//! - Capture bodies without stealing them from downstream consumers
//!
//! # Design Decisions
//! - Bodies are read chunk by chunk and reinstalled as a replay of the
//!   chunks already read, followed by whatever the original stream still
//!   yields (the rest of an oversized body, or its read error)
//! - At most `max_body_size` bytes are kept for telemetry
//! - Extraction never fails towards the caller; problems are logged and the
//!   partial property set is returned
//! - Streaming responses (`text/event-stream`) are never buffered

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, Uri, Version};
use axum::response::Response;
use futures_util::{stream, StreamExt};

use crate::error::TelemetryError;
use crate::tracking::redaction::RedactionPolicy;

/// Ordered property bag attached to telemetry events.
pub type Properties = BTreeMap<String, String>;

/// Captured body value for an empty or `null` response.
pub const NO_RESPONSE: &str = "NO_RESPONSE";

/// Default number of body bytes kept for telemetry.
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024;

pub const REQUEST_METHOD: &str = "Request:Method";
pub const REQUEST_PROTOCOL: &str = "Request:Protocol";
pub const REQUEST_SCHEME: &str = "Request:Scheme";
pub const REQUEST_HOST: &str = "Request:Host";
pub const REQUEST_PATH: &str = "Request:Path";
pub const REQUEST_QUERY: &str = "Request:QueryString";
pub const REQUEST_BODY: &str = "Request:Body";
pub const REQUEST_HEADER_PREFIX: &str = "Request:Header:";
pub const RESPONSE_STATUS: &str = "Response:StatusCode";
pub const RESPONSE_BODY: &str = "Response:Body";
pub const RESPONSE_HEADER_PREFIX: &str = "Response:Header:";

/// Request body bytes already buffered during this request. Holds at most
/// the configured body limit.
#[derive(Debug, Clone)]
pub struct BufferedBody(pub Bytes);

/// Read-only copy of the request head, taken before the request is handed
/// downstream.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestSnapshot {
    pub fn capture(request: &Request<Body>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            body: request
                .extensions()
                .get::<BufferedBody>()
                .map(|b| b.0.clone()),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Methods whose bodies are never captured.
pub fn is_no_body_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::TRACE)
}

/// Builds property maps from requests and responses.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    redaction: Arc<RedactionPolicy>,
    request_body: bool,
    response_body: bool,
    max_body_size: usize,
}

impl MetadataExtractor {
    pub fn new(redaction: Arc<RedactionPolicy>, request_body: bool, response_body: bool) -> Self {
        Self {
            redaction,
            request_body,
            response_body,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Cap on body bytes kept per request or response. `0` means no cap.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn captures_response_body(&self) -> bool {
        self.response_body
    }

    /// Properties for a live request. Buffers the body when body logging
    /// applies; the request keeps a fully readable body afterwards.
    pub async fn extract_request_properties(&self, request: &mut Request<Body>) -> Properties {
        let body = if self.request_body && !is_no_body_method(request.method()) {
            match buffer_request_body(request, self.max_body_size).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::debug!(error = %e, "Request body capture skipped");
                    None
                }
            }
        } else {
            None
        };

        let mut props = self.head_properties(
            request.method(),
            request.uri(),
            request.version(),
            request.headers(),
        );
        if let Some(bytes) = body {
            props.insert(REQUEST_BODY.into(), String::from_utf8_lossy(&bytes).into_owned());
        }
        props
    }

    /// Properties for a request that has already been handed downstream.
    pub fn snapshot_properties(&self, snapshot: &RequestSnapshot) -> Properties {
        let mut props = self.head_properties(
            &snapshot.method,
            &snapshot.uri,
            snapshot.version,
            &snapshot.headers,
        );
        if self.request_body && !is_no_body_method(&snapshot.method) {
            if let Some(bytes) = &snapshot.body {
                props.insert(REQUEST_BODY.into(), String::from_utf8_lossy(bytes).into_owned());
            }
        }
        props
    }

    /// Properties for a response. Buffers and reinstalls the body when
    /// response body logging is on.
    pub async fn extract_response_properties(&self, response: &mut Response) -> Properties {
        let mut props = Properties::new();
        self.header_properties(&mut props, RESPONSE_HEADER_PREFIX, response.headers());
        props.insert(RESPONSE_STATUS.into(), response.status().as_u16().to_string());

        if self.response_body && !is_streaming(response.headers()) {
            match buffer_response_body(response, self.max_body_size).await {
                Ok(bytes) => {
                    props.insert(RESPONSE_BODY.into(), render_payload(&bytes));
                }
                Err(e) => tracing::debug!(error = %e, "Response body capture skipped"),
            }
        }
        props
    }

    fn head_properties(
        &self,
        method: &Method,
        uri: &Uri,
        version: Version,
        headers: &HeaderMap,
    ) -> Properties {
        let mut props = Properties::new();
        self.header_properties(&mut props, REQUEST_HEADER_PREFIX, headers);

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        props.insert(REQUEST_METHOD.into(), method.to_string());
        props.insert(REQUEST_PROTOCOL.into(), format!("{:?}", version));
        props.insert(REQUEST_SCHEME.into(), uri.scheme_str().unwrap_or("http").to_string());
        props.insert(REQUEST_HOST.into(), host);
        props.insert(REQUEST_PATH.into(), uri.path().to_string());
        props.insert(
            REQUEST_QUERY.into(),
            uri.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        );
        props
    }

    fn header_properties(&self, props: &mut Properties, prefix: &str, headers: &HeaderMap) {
        for name in headers.keys() {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            let value = self.redaction.apply(name.as_str(), &joined).to_string();
            props.insert(format!("{}{}", prefix, name), value);
        }
    }
}

/// Buffer up to `limit` bytes of the request body and put an equivalent
/// body back. On a read error the reinstalled body replays the bytes
/// already read, then fails the same way.
///
/// Repeated calls reuse the first buffered copy.
pub async fn buffer_request_body(
    request: &mut Request<Body>,
    limit: usize,
) -> Result<Bytes, TelemetryError> {
    if let Some(buffered) = request.extensions().get::<BufferedBody>() {
        return Ok(buffered.0.clone());
    }

    let (body, captured) = tee_body(std::mem::take(request.body_mut()), limit).await;
    *request.body_mut() = body;
    let bytes = captured.map_err(|source| TelemetryError::BodyRead {
        which: "request",
        source,
    })?;
    request.extensions_mut().insert(BufferedBody(bytes.clone()));
    Ok(bytes)
}

async fn buffer_response_body(response: &mut Response, limit: usize) -> Result<Bytes, TelemetryError> {
    let (body, captured) = tee_body(std::mem::take(response.body_mut()), limit).await;
    *response.body_mut() = body;
    captured.map_err(|source| TelemetryError::BodyRead {
        which: "response",
        source,
    })
}

/// Read `body` until it ends, fails, or passes `limit` bytes.
///
/// Returns a body that yields exactly what `body` would have yielded, and
/// the captured prefix (or the read error).
async fn tee_body(body: Body, limit: usize) -> (Body, Result<Bytes, axum::Error>) {
    let limit = if limit == 0 { usize::MAX } else { limit };
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut seen = 0usize;

    loop {
        match data.next().await {
            None => {
                let bytes = concat(&chunks, usize::MAX);
                return (Body::from(bytes.clone()), Ok(bytes));
            }
            Some(Ok(chunk)) => {
                seen = seen.saturating_add(chunk.len());
                chunks.push(chunk);
                if seen > limit {
                    let captured = concat(&chunks, limit);
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(data);
                    return (Body::from_stream(replay), Ok(captured));
                }
            }
            Some(Err(e)) => {
                let reported = axum::Error::new(e.to_string());
                let replay = stream::iter(
                    chunks
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(e))),
                );
                return (Body::from_stream(replay), Err(reported));
            }
        }
    }
}

fn concat(chunks: &[Bytes], limit: usize) -> Bytes {
    if let [single] = chunks {
        return single.slice(..single.len().min(limit));
    }
    let mut buf: Vec<u8> = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        if buf.len() >= limit {
            break;
        }
    }
    buf.truncate(limit);
    Bytes::from(buf)
}

fn is_streaming(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

/// Render a response payload for logging.
///
/// JSON strings are unwrapped, other JSON is re-serialized compactly,
/// empty bodies and `null` become [`NO_RESPONSE`], anything else is taken
/// as text.
pub fn render_payload(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return NO_RESPONSE.to_string();
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Null) => NO_RESPONSE.to_string(),
        Ok(serde_json::Value::String(s)) => s,
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
