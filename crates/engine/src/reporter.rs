//! Sink for failures of best-effort background work.

use crate::error::EngineError;

/// Receives errors that must not fail the caller's operation, such as a
/// failed availability log write.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &'static str, error: &EngineError);
}

/// Default sink: log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &'static str, error: &EngineError) {
        tracing::error!(
            context = context,
            code = error.code(),
            error = %error,
            "Background operation failed"
        );
    }
}
