//! Header redaction before values reach telemetry.

use axum::http::HeaderName;

/// Replacement for every redacted header value.
pub const REDACTED: &str = "REDACTED";

/// Header that is always redacted.
pub const ALWAYS_REDACTED: &str = "Authorization";

/// Set of header names whose values must never be logged.
///
/// Header names are case-insensitive on the wire and the `http` crate
/// normalises them to lower case, so matching ignores ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    names: Vec<String>,
}

impl RedactionPolicy {
    /// Policy with only the mandatory `Authorization` entry.
    pub fn new() -> Self {
        Self {
            names: vec![ALWAYS_REDACTED.to_string()],
        }
    }

    /// Build from a comma-separated list, e.g. `"X-Api-Key,Cookie"`.
    /// Empty entries are skipped.
    pub fn from_list(list: &str) -> Self {
        let mut policy = Self::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            policy.add(name);
        }
        policy
    }

    pub fn add(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.should_redact(&name) {
            self.names.push(name);
        }
    }

    pub fn should_redact(&self, header: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(header))
    }

    /// Value to log for `header`.
    pub fn apply<'a>(&self, header: &str, value: &'a str) -> &'a str {
        if self.should_redact(header) {
            REDACTED
        } else {
            value
        }
    }

    /// Configured names as header names; entries that are not valid header
    /// names are skipped.
    pub fn header_names(&self) -> Vec<HeaderName> {
        self.names
            .iter()
            .filter_map(|n| HeaderName::from_bytes(n.as_bytes()).ok())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new()
    }
}
