//! Resolution of raw settings into the immutable tracking configuration.

use std::sync::Arc;

use axum::http::HeaderName;
use once_cell::sync::OnceCell;

use crate::config::schema::TelemetrySettings;
use crate::error::TelemetryError;
use crate::telemetry::Severity;
use crate::tracking::{HeaderKeys, IdentifierResolver, MetadataExtractor, Properties, RedactionPolicy};

/// Everything the request pipeline needs, resolved once and shared.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub service_name: String,
    pub header_keys: HeaderKeys,
    pub regenerate_sub_correlation_id: bool,
    pub verbose: bool,
    pub request_body: bool,
    pub response_body: bool,
    pub redaction: Arc<RedactionPolicy>,
    pub min_severity: Severity,
    pub max_property_size: usize,
    pub max_body_size: usize,
    pub custom_properties: Properties,
}

impl TrackingConfig {
    pub fn from_settings(settings: &TelemetrySettings) -> Result<Self, TelemetryError> {
        let app = &settings.application;
        let logging = &settings.logging;

        let header_keys = HeaderKeys {
            correlation_id: parse_key(&app.correlation_id_header_key)?
                .ok_or(TelemetryError::MissingCorrelationKey)?,
            sub_correlation_id: parse_key(&app.sub_correlation_id_header_key)?,
            transaction_id: parse_key(&app.transaction_id_header_key)?,
            end_to_end_id: parse_key(&app.end_to_end_id_header_key)?,
        };

        // Request/response messages are Verbose; asking for them lowers
        // the floor so they are not dropped.
        let min_severity = if logging.verbose_enabled() || logging.response_body {
            Severity::Verbose
        } else {
            Severity::from_level_str(&logging.level)
        };

        Ok(Self {
            service_name: app.name.clone(),
            header_keys,
            regenerate_sub_correlation_id: app.regenerate_sub_correlation_id,
            verbose: logging.verbose_enabled(),
            request_body: logging.request_body,
            response_body: logging.response_body,
            redaction: Arc::new(RedactionPolicy::from_list(&logging.redacted_headers)),
            min_severity,
            max_property_size: logging.max_property_size,
            max_body_size: logging.max_body_size,
            custom_properties: logging.custom_properties.clone(),
        })
    }

    pub fn identifier_resolver(&self) -> IdentifierResolver {
        IdentifierResolver::new(self.header_keys.clone())
            .regenerate_sub_correlation(self.regenerate_sub_correlation_id)
    }

    pub fn metadata_extractor(&self) -> MetadataExtractor {
        MetadataExtractor::new(self.redaction.clone(), self.request_body, self.response_body)
            .with_max_body_size(self.max_body_size)
    }

    /// Severity floor actually applied to events. Request/response messages
    /// are `Verbose`, so asking for them lowers `min_severity`.
    pub fn effective_min_severity(&self) -> Severity {
        if self.verbose || self.response_body {
            self.min_severity.min(Severity::Verbose)
        } else {
            self.min_severity
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let settings = TelemetrySettings::default();
        Self {
            service_name: settings.application.name,
            header_keys: HeaderKeys::default(),
            regenerate_sub_correlation_id: settings.application.regenerate_sub_correlation_id,
            verbose: false,
            request_body: false,
            response_body: false,
            redaction: Arc::new(RedactionPolicy::new()),
            min_severity: Severity::from_level_str(&settings.logging.level),
            max_property_size: settings.logging.max_property_size,
            max_body_size: settings.logging.max_body_size,
            custom_properties: Properties::new(),
        }
    }
}

/// Blank keys are disabled.
fn parse_key(key: &str) -> Result<Option<HeaderName>, TelemetryError> {
    let key = key.trim();
    if key.is_empty() {
        return Ok(None);
    }
    HeaderName::from_bytes(key.as_bytes())
        .map(Some)
        .map_err(|source| TelemetryError::HeaderName {
            key: key.to_string(),
            source,
        })
}

/// Memoizes the resolved configuration. The first successful resolution
/// wins; failures are not cached.
#[derive(Debug)]
pub struct ConfigResolver {
    settings: TelemetrySettings,
    resolved: OnceCell<Arc<TrackingConfig>>,
}

impl ConfigResolver {
    pub fn new(settings: TelemetrySettings) -> Self {
        Self {
            settings,
            resolved: OnceCell::new(),
        }
    }

    pub fn resolve(&self) -> Result<Arc<TrackingConfig>, TelemetryError> {
        self.resolved
            .get_or_try_init(|| {
                let config = TrackingConfig::from_settings(&self.settings)?;
                tracing::debug!(
                    correlation_header = %config.header_keys.correlation_id,
                    verbose = config.verbose,
                    redacted = config.redaction.names().len(),
                    "Tracking configuration resolved"
                );
                Ok(Arc::new(config))
            })
            .cloned()
    }

    pub fn settings(&self) -> &TelemetrySettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_once() {
        let resolver = ConfigResolver::new(TelemetrySettings::default());
        let a = resolver.resolve().unwrap();
        let b = resolver.resolve().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_blank_keys_disable_headers() {
        let mut settings = TelemetrySettings::default();
        settings.application.sub_correlation_id_header_key = " ".into();
        settings.logging.redacted_headers = "Cookie".into();
        settings.logging.level = "warn".into();

        let config = TrackingConfig::from_settings(&settings).unwrap();
        assert!(config.header_keys.sub_correlation_id.is_none());
        assert!(config.header_keys.transaction_id.is_some());
        assert!(config.redaction.should_redact("cookie"));
        assert_eq!(config.min_severity, Severity::Warning);
    }

    #[test]
    fn test_verbose_lowers_severity_floor() {
        let mut settings = TelemetrySettings::default();
        settings.logging.verbose = true;
        let config = TrackingConfig::from_settings(&settings).unwrap();
        assert!(config.verbose);
        assert_eq!(config.min_severity, Severity::Verbose);
    }

    #[test]
    fn test_effective_floor_for_hand_built_config() {
        let quiet = TrackingConfig::default();
        assert_eq!(quiet.effective_min_severity(), Severity::Information);

        let verbose = TrackingConfig {
            verbose: true,
            ..TrackingConfig::default()
        };
        assert_eq!(verbose.min_severity, Severity::Information);
        assert_eq!(verbose.effective_min_severity(), Severity::Verbose);

        let response_body = TrackingConfig {
            response_body: true,
            min_severity: Severity::Error,
            ..TrackingConfig::default()
        };
        assert_eq!(response_body.effective_min_severity(), Severity::Verbose);
    }

    #[test]
    fn test_blank_correlation_key_fails() {
        let mut settings = TelemetrySettings::default();
        settings.application.correlation_id_header_key = String::new();

        let resolver = ConfigResolver::new(settings);
        assert!(resolver.resolve().is_err());
        assert!(resolver.resolve().is_err());
    }

    #[test]
    fn test_default_matches_default_settings() {
        let from_settings = TrackingConfig::from_settings(&TelemetrySettings::default()).unwrap();
        let default = TrackingConfig::default();
        assert_eq!(from_settings.header_keys, default.header_keys);
        assert_eq!(from_settings.min_severity, default.min_severity);
        assert_eq!(from_settings.verbose, default.verbose);
    }
}
