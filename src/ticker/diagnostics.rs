/// Receiver of the ticker's lifecycle and failure messages.
pub trait DiagnosticSink: Send + Sync {
    fn debug(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards diagnostics to `tracing` under the `tickcount::ticker` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "tickcount::ticker", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "tickcount::ticker", "{}", message);
    }
}
