//! Structured failure notifications for operator visibility.
//!
//! Components report through an optional [`DiagnosticsSink`]; nothing in the
//! pipeline requires one to be installed.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// One reported condition.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    /// Reporting component, e.g. `compute` or `compositor`.
    pub source: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl DiagnosticEvent {
    pub fn new(source: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            source,
            severity,
            message: message.into(),
        }
    }
}

pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, event: DiagnosticEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, event: DiagnosticEvent) {
        match event.severity {
            Severity::Warning => tracing::warn!(source = event.source, "{}", event.message),
            Severity::Error | Severity::Fatal => {
                tracing::error!(source = event.source, severity = %event.severity, "{}", event.message)
            }
        }
    }
}

/// Report to `sink` if one is installed.
pub fn report(sink: Option<&Arc<dyn DiagnosticsSink>>, event: DiagnosticEvent) {
    if let Some(sink) = sink {
        sink.report(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DiagnosticEvent>>);

    impl DiagnosticsSink for Recorder {
        fn report(&self, event: DiagnosticEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_report_without_sink_is_noop() {
        report(None, DiagnosticEvent::new("compute", Severity::Error, "boom"));
    }

    #[test]
    fn test_report_reaches_sink() {
        let rec = Arc::new(Recorder::default());
        let sink: Arc<dyn DiagnosticsSink> = rec.clone();
        report(
            Some(&sink),
            DiagnosticEvent::new("compositor", Severity::Fatal, "link failed"),
        );
        let events = rec.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Fatal);
    }
}
