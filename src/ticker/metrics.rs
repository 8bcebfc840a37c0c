use chrono::{DateTime, Utc};
use std::time::Duration;

/// Observer notified once after every handler invocation.
pub trait TickerMetrics: Send + Sync {
    /// `succeeded` is false when the handler returned an error or panicked.
    fn observe(&self, name: &str, started_at: DateTime<Utc>, elapsed: Duration, succeeded: bool);
}
