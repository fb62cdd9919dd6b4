//! Sink for terminal failures and user-visible facts.

use ferryfile_core::{OpsError, Severity};

/// Receives every terminal failure; the host decides how to present it.
pub trait ErrorSink: Send + Sync + std::fmt::Debug {
    fn report(&self, message: &str, severity: Severity, error: Option<&OpsError>);
}

/// Forwards reports to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, message: &str, severity: Severity, error: Option<&OpsError>) {
        let detail = error.map(ToString::to_string).unwrap_or_default();
        match severity {
            Severity::Info => tracing::info!(target: "ferry::ops", detail = %detail, "{message}"),
            Severity::Warning => {
                tracing::warn!(target: "ferry::ops", detail = %detail, "{message}")
            }
            Severity::Error => {
                tracing::error!(target: "ferry::ops", detail = %detail, "{message}")
            }
            Severity::Critical => {
                tracing::error!(target: "ferry::ops", critical = true, detail = %detail, "{message}")
            }
        }
    }
}
