//! tickcount
//!
//! Two small concurrency primitives: a managed periodic-job runner
//! ([`Ticker`]) and a counter map whose entries expire after a period of
//! inactivity ([`TtlCounter`]). They are independent, but compose naturally:
//! a ticker can drive a counter's vacuum.

pub mod config;
pub mod metrics;
pub mod ticker;
pub mod ttl_counter;

// Re-export commonly used types for convenience
pub use metrics::PrometheusTickerMetrics;
pub use ticker::{DiagnosticSink, TickHandler, Ticker, TickerBuilder, TickerError, TickerMetrics};
pub use ttl_counter::{TtlCounter, DEFAULT_TTL, MAX_TTL};
