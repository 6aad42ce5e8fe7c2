//! Outbound dependency tracking.

use std::time::Instant;

use crate::telemetry::client::TelemetryClient;
use crate::telemetry::event::{EventKind, Severity, TelemetryEvent};
use crate::tracking::Properties;

/// Times a call to an external dependency and reports it when completed.
///
/// ```text
/// let timer = DependencyTimer::start("payments", "https://pay.example", "HTTP", "POST /charge");
/// let resp = call().await;
/// client.emit(timer.complete(resp.status().as_str(), None));
/// ```
#[derive(Debug)]
pub struct DependencyTimer {
    name: String,
    target: String,
    dependency_type: String,
    command: String,
    started: Instant,
    properties: Properties,
}

impl DependencyTimer {
    pub fn start(
        name: impl Into<String>,
        target: impl Into<String>,
        dependency_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            dependency_type: dependency_type.into(),
            command: command.into(),
            started: Instant::now(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Finish the measurement.
    ///
    /// The call counts as successful when `result_code` is a 1xx-3xx status
    /// code, or `"0"`/`"OK"` for non-HTTP dependencies. Failed calls are
    /// reported at `Warning`.
    pub fn complete(self, result_code: impl Into<String>, response: Option<String>) -> TelemetryEvent {
        let result_code = result_code.into();
        let success = is_success(&result_code);
        let severity = if success {
            Severity::Information
        } else {
            Severity::Warning
        };
        TelemetryEvent::new(
            severity,
            EventKind::Dependency {
                name: self.name,
                target: self.target,
                dependency_type: self.dependency_type,
                command: self.command,
                duration: self.started.elapsed(),
                success,
                result_code,
                response,
            },
        )
        .with_properties(self.properties)
    }

    /// Finish and emit through `client`.
    pub fn complete_with(self, client: &TelemetryClient, result_code: impl Into<String>, response: Option<String>) {
        client.emit(self.complete(result_code, response));
    }
}

fn is_success(result_code: &str) -> bool {
    match result_code.parse::<u16>() {
        Ok(0) => true,
        Ok(code) => (100..400).contains(&code),
        Err(_) => result_code.eq_ignore_ascii_case("ok"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::telemetry::sink::MemorySink;

    #[test]
    fn test_complete_success() {
        let timer = DependencyTimer::start("db", "postgres://main", "SQL", "SELECT 1")
            .with_property("pool", "primary");
        std::thread::sleep(Duration::from_millis(2));
        let event = timer.complete("0", None);

        assert_eq!(event.severity, Severity::Information);
        assert_eq!(event.properties["pool"], "primary");
        match event.kind {
            EventKind::Dependency {
                success, duration, command, ..
            } => {
                assert!(success);
                assert!(duration >= Duration::from_millis(2));
                assert_eq!(command, "SELECT 1");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_failed_call_is_warning() {
        let sink = MemorySink::new();
        let client = TelemetryClient::new(Arc::new(sink.clone()));
        DependencyTimer::start("pay", "https://pay", "HTTP", "POST /charge").complete_with(
            &client,
            "503",
            Some("unavailable".into()),
        );

        let event = &sink.events()[0];
        assert_eq!(event.severity, Severity::Warning);
        assert!(matches!(
            &event.kind,
            EventKind::Dependency { success: false, response: Some(r), .. } if r == "unavailable"
        ));
    }

    #[test]
    fn test_success_codes() {
        assert!(is_success("200"));
        assert!(is_success("302"));
        assert!(is_success("OK"));
        assert!(!is_success("404"));
        assert!(!is_success("timeout"));
    }
}
