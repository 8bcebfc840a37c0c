use crate::ticker::TickerMetrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all tickcount metrics
const PREFIX: &str = "tickcount";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Ticker Metrics
    pub static ref TICKER_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_ticker_runs_total"), "Total ticker handler invocations"),
        &["ticker", "status"]
    ).expect("Failed to create ticker_runs_total metric");

    pub static ref TICKER_RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_ticker_run_duration_seconds"),
            "Ticker handler duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["ticker"]
    ).expect("Failed to create ticker_run_duration_seconds metric");

    // Counter Metrics
    pub static ref COUNTER_KEYS: IntGauge = IntGauge::new(
        format!("{PREFIX}_counter_keys"),
        "Number of keys held by the TTL counter"
    ).expect("Failed to create counter_keys metric");

    pub static ref COUNTER_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_counter_evictions_total"),
        "Total keys removed by TTL counter sweeps"
    ).expect("Failed to create counter_evictions_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(TICKER_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TICKER_RUN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(COUNTER_KEYS.clone()));
    let _ = REGISTRY.register(Box::new(COUNTER_EVICTIONS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a ticker handler invocation
pub fn record_ticker_run(ticker: &str, succeeded: bool, duration: Duration) {
    let status = if succeeded { "success" } else { "failure" };
    TICKER_RUNS_TOTAL.with_label_values(&[ticker, status]).inc();

    TICKER_RUN_DURATION_SECONDS
        .with_label_values(&[ticker])
        .observe(duration.as_secs_f64());
}

pub fn set_counter_keys(count: usize) {
    COUNTER_KEYS.set(count as i64);
}

pub fn record_counter_evictions(count: usize) {
    COUNTER_EVICTIONS_TOTAL.inc_by(count as u64);
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// [`TickerMetrics`] backed by the global Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusTickerMetrics;

impl TickerMetrics for PrometheusTickerMetrics {
    fn observe(&self, name: &str, _started_at: DateTime<Utc>, elapsed: Duration, succeeded: bool) {
        record_ticker_run(name, succeeded, elapsed);
    }
}
