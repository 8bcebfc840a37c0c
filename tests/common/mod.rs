//! Common test infrastructure
//!
//! Recording implementations of the ticker's diagnostic and metrics sinks,
//! plus a polling helper for state that settles asynchronously.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tickcount::{DiagnosticSink, TickerMetrics};

/// Keeps every diagnostic message, by level.
#[derive(Default)]
pub struct RecordingSink {
    debugs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn debugs(&self) -> Vec<String> {
        self.debugs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl DiagnosticSink for RecordingSink {
    fn debug(&self, message: &str) {
        self.debugs.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub succeeded: bool,
}

/// Keeps every metrics observation.
#[derive(Default)]
pub struct RecordingMetrics {
    observations: Mutex<Vec<Observation>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations.lock().unwrap().clone()
    }
}

impl TickerMetrics for RecordingMetrics {
    fn observe(&self, name: &str, started_at: DateTime<Utc>, elapsed: Duration, succeeded: bool) {
        self.observations.lock().unwrap().push(Observation {
            name: name.to_string(),
            started_at,
            elapsed,
            succeeded,
        });
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
