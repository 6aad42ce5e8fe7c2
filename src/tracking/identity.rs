//! Tracking identifier resolution.
//!
//! # Responsibilities
//! - Read the four tracking identifiers from inbound headers
//! - Generate a UUID v4 for every identifier that is missing or empty
//! - Expose the resolved identity to handlers (extensions, task-local)
//!
//! # Design Decisions
//! - Resolution is pure; writing generated values back onto the request is
//!   the caller's job
//! - An empty header value counts as absent
//! - Once resolved, a `RequestIdentity` is never mutated

use std::fmt;
use std::future::Future;

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap, HeaderName, StatusCode};
use serde::Serialize;
use uuid::Uuid;

/// Default header carrying the correlation id.
pub const DEFAULT_CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Default header carrying the sub-correlation id.
pub const DEFAULT_SUB_CORRELATION_ID_HEADER: &str = "x-sub-correlation-id";
/// Default header carrying the transaction id.
pub const DEFAULT_TRANSACTION_ID_HEADER: &str = "x-transaction-id";
/// Default header carrying the end-to-end tracking id.
pub const DEFAULT_END_TO_END_ID_HEADER: &str = "x-end-to-end-id";

/// The four tracking identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Correlation,
    SubCorrelation,
    Transaction,
    EndToEnd,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 4] = [
        IdentifierKind::Correlation,
        IdentifierKind::SubCorrelation,
        IdentifierKind::Transaction,
        IdentifierKind::EndToEnd,
    ];

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            IdentifierKind::Correlation => "correlation_id",
            IdentifierKind::SubCorrelation => "sub_correlation_id",
            IdentifierKind::Transaction => "transaction_id",
            IdentifierKind::EndToEnd => "end_to_end_id",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Header names carrying each identifier.
///
/// The correlation key is mandatory. The others may be unset, in which case
/// the identifier is still generated for telemetry but never read from or
/// written to headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderKeys {
    pub correlation_id: HeaderName,
    pub sub_correlation_id: Option<HeaderName>,
    pub transaction_id: Option<HeaderName>,
    pub end_to_end_id: Option<HeaderName>,
}

impl HeaderKeys {
    /// Header name configured for `kind`, if any.
    pub fn get(&self, kind: IdentifierKind) -> Option<&HeaderName> {
        match kind {
            IdentifierKind::Correlation => Some(&self.correlation_id),
            IdentifierKind::SubCorrelation => self.sub_correlation_id.as_ref(),
            IdentifierKind::Transaction => self.transaction_id.as_ref(),
            IdentifierKind::EndToEnd => self.end_to_end_id.as_ref(),
        }
    }
}

impl Default for HeaderKeys {
    fn default() -> Self {
        Self {
            correlation_id: HeaderName::from_static(DEFAULT_CORRELATION_ID_HEADER),
            sub_correlation_id: Some(HeaderName::from_static(DEFAULT_SUB_CORRELATION_ID_HEADER)),
            transaction_id: Some(HeaderName::from_static(DEFAULT_TRANSACTION_ID_HEADER)),
            end_to_end_id: Some(HeaderName::from_static(DEFAULT_END_TO_END_ID_HEADER)),
        }
    }
}

/// Identifiers attached to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestIdentity {
    correlation_id: String,
    sub_correlation_id: String,
    transaction_id: String,
    end_to_end_id: String,
}

impl RequestIdentity {
    pub fn new(
        correlation_id: impl Into<String>,
        sub_correlation_id: impl Into<String>,
        transaction_id: impl Into<String>,
        end_to_end_id: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            sub_correlation_id: sub_correlation_id.into(),
            transaction_id: transaction_id.into(),
            end_to_end_id: end_to_end_id.into(),
        }
    }

    /// A fully generated identity.
    pub fn generate() -> Self {
        Self::new(new_id(), new_id(), new_id(), new_id())
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn sub_correlation_id(&self) -> &str {
        &self.sub_correlation_id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn end_to_end_id(&self) -> &str {
        &self.end_to_end_id
    }

    pub fn get(&self, kind: IdentifierKind) -> &str {
        match kind {
            IdentifierKind::Correlation => &self.correlation_id,
            IdentifierKind::SubCorrelation => &self.sub_correlation_id,
            IdentifierKind::Transaction => &self.transaction_id,
            IdentifierKind::EndToEnd => &self.end_to_end_id,
        }
    }
}

/// Outcome of resolving identifiers for a request.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: RequestIdentity,
    /// Identifiers that were not taken from the request.
    pub generated: Vec<IdentifierKind>,
}

impl Resolution {
    pub fn was_generated(&self, kind: IdentifierKind) -> bool {
        self.generated.contains(&kind)
    }
}

/// Derives a [`RequestIdentity`] from request headers.
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    keys: HeaderKeys,
    regenerate_sub_correlation: bool,
}

impl IdentifierResolver {
    pub fn new(keys: HeaderKeys) -> Self {
        Self {
            keys,
            regenerate_sub_correlation: false,
        }
    }

    /// Issue a fresh sub-correlation id on every resolution, ignoring any
    /// inbound value. Each tracking pass is its own hop.
    pub fn regenerate_sub_correlation(mut self, enabled: bool) -> Self {
        self.regenerate_sub_correlation = enabled;
        self
    }

    pub fn keys(&self) -> &HeaderKeys {
        &self.keys
    }

    /// Resolve all four identifiers. Never touches the request.
    pub fn resolve(&self, headers: &HeaderMap) -> Resolution {
        let mut generated = Vec::new();
        let mut take = |kind: IdentifierKind| {
            let inbound = if kind == IdentifierKind::SubCorrelation && self.regenerate_sub_correlation {
                None
            } else {
                self.existing(headers, kind)
            };
            inbound.unwrap_or_else(|| {
                generated.push(kind);
                new_id()
            })
        };

        let identity = RequestIdentity {
            correlation_id: take(IdentifierKind::Correlation),
            sub_correlation_id: take(IdentifierKind::SubCorrelation),
            transaction_id: take(IdentifierKind::Transaction),
            end_to_end_id: take(IdentifierKind::EndToEnd),
        };

        Resolution {
            identity,
            generated,
        }
    }

    /// The inbound value for `kind`, if its header is configured, present and
    /// non-empty. Only the first value counts.
    pub fn existing(&self, headers: &HeaderMap, kind: IdentifierKind) -> Option<String> {
        let key = self.keys.get(kind)?;
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

tokio::task_local! {
    static CURRENT_IDENTITY: RequestIdentity;
}

/// Run `fut` with `identity` visible through [`current_identity`].
pub async fn scope<F>(identity: RequestIdentity, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_IDENTITY.scope(identity, fut).await
}

/// Identity of the request currently being served on this task, if any.
pub fn current_identity() -> Option<RequestIdentity> {
    CURRENT_IDENTITY.try_with(Clone::clone).ok()
}

impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .or_else(current_identity)
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Request identity unavailable: telemetry layer not installed",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_generates_all_when_absent() {
        let resolver = IdentifierResolver::default();
        let res = resolver.resolve(&HeaderMap::new());

        assert_eq!(res.generated.len(), 4);
        for kind in IdentifierKind::ALL {
            assert_eq!(res.identity.get(kind).len(), 36);
        }
        assert_ne!(res.identity.correlation_id(), res.identity.transaction_id());
    }

    #[test]
    fn test_uses_inbound_values() {
        let resolver = IdentifierResolver::default();
        let res = resolver.resolve(&headers(&[
            ("x-correlation-id", "abc-123"),
            ("x-transaction-id", "txn-9"),
        ]));

        assert_eq!(res.identity.correlation_id(), "abc-123");
        assert_eq!(res.identity.transaction_id(), "txn-9");
        assert!(!res.was_generated(IdentifierKind::Correlation));
        assert!(res.was_generated(IdentifierKind::SubCorrelation));
        assert!(res.was_generated(IdentifierKind::EndToEnd));
    }

    #[test]
    fn test_empty_value_is_regenerated() {
        let resolver = IdentifierResolver::default();
        let res = resolver.resolve(&headers(&[("x-correlation-id", "")]));

        assert!(res.was_generated(IdentifierKind::Correlation));
        assert!(!res.identity.correlation_id().is_empty());
    }

    #[test]
    fn test_first_value_wins() {
        let resolver = IdentifierResolver::default();
        let res = resolver.resolve(&headers(&[
            ("x-correlation-id", "first"),
            ("x-correlation-id", "second"),
        ]));
        assert_eq!(res.identity.correlation_id(), "first");
    }

    #[test]
    fn test_unset_key_always_generates() {
        let keys = HeaderKeys {
            transaction_id: None,
            ..HeaderKeys::default()
        };
        let resolver = IdentifierResolver::new(keys);
        let res = resolver.resolve(&headers(&[("x-transaction-id", "ignored")]));

        assert!(res.was_generated(IdentifierKind::Transaction));
        assert_ne!(res.identity.transaction_id(), "ignored");
    }

    #[test]
    fn test_sub_correlation_regeneration() {
        let inbound = headers(&[("x-sub-correlation-id", "hop-1")]);

        let honoring = IdentifierResolver::default();
        assert_eq!(honoring.resolve(&inbound).identity.sub_correlation_id(), "hop-1");

        let regenerating = IdentifierResolver::default().regenerate_sub_correlation(true);
        let res = regenerating.resolve(&inbound);
        assert_ne!(res.identity.sub_correlation_id(), "hop-1");
        assert!(res.was_generated(IdentifierKind::SubCorrelation));
    }

    #[test]
    fn test_resolution_does_not_mutate_headers() {
        let resolver = IdentifierResolver::default();
        let map = HeaderMap::new();
        let _ = resolver.resolve(&map);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_task_local_scope() {
        assert!(current_identity().is_none());
        let identity = RequestIdentity::new("c", "s", "t", "e");
        let seen = scope(identity.clone(), async { current_identity() }).await;
        assert_eq!(seen, Some(identity));
        assert!(current_identity().is_none());
    }
}
