//! Managed periodic job execution.
//!
//! A [`Ticker`] owns one handler and runs it at a fixed interval on a
//! background task, with idempotent start/stop, optionally time-bounded
//! shutdown, panic containment and pluggable metrics.

mod diagnostics;
mod handler;
mod metrics;
mod runner;

pub use diagnostics::{DiagnosticSink, TracingSink};
pub use handler::{TickHandler, TickerError};
pub use metrics::TickerMetrics;
pub use runner::{Ticker, TickerBuilder};
