mod file_config;

pub use file_config::{CounterConfig, FileConfig, TickerConfig};

use anyhow::{bail, Result};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub ttl_ms: u64,
    pub vacuum_interval_ms: u64,
    pub report_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub counter: CounterSettings,
    pub ticker: TickerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSettings {
    /// Zero is left as is; the counter replaces it with its default TTL.
    pub ttl: Duration,
    pub vacuum_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerSettings {
    pub report_interval: Duration,
    /// `None` waits for the in-flight handler indefinitely.
    pub stop_timeout: Option<Duration>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let counter_file = file.counter.unwrap_or_default();
        let ticker_file = file.ticker.unwrap_or_default();

        let ttl_ms = counter_file.ttl_ms.unwrap_or(cli.ttl_ms);
        let vacuum_interval_ms = counter_file
            .vacuum_interval_ms
            .unwrap_or(cli.vacuum_interval_ms);
        let report_interval_ms = ticker_file
            .report_interval_ms
            .unwrap_or(cli.report_interval_ms);
        let stop_timeout_ms = ticker_file.stop_timeout_ms.unwrap_or(cli.stop_timeout_ms);

        if vacuum_interval_ms == 0 {
            bail!("vacuum_interval_ms must be greater than zero");
        }
        if report_interval_ms == 0 {
            bail!("report_interval_ms must be greater than zero");
        }

        Ok(Self {
            counter: CounterSettings {
                ttl: Duration::from_millis(ttl_ms),
                vacuum_interval: Duration::from_millis(vacuum_interval_ms),
            },
            ticker: TickerSettings {
                report_interval: Duration::from_millis(report_interval_ms),
                stop_timeout: (stop_timeout_ms > 0).then(|| Duration::from_millis(stop_timeout_ms)),
            },
        })
    }
}
