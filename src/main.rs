use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tickcount::config::{AppConfig, CliConfig, FileConfig};
use tickcount::{metrics, PrometheusTickerMetrics, Ticker, TtlCounter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How many keys the periodic report lists.
const REPORT_TOP_KEYS: usize = 5;

/// Count whitespace-separated keys read from stdin, forgetting keys that
/// have not been seen for a while.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// How long a key lives after its last increment, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub ttl_ms: u64,

    /// Interval between sweeps of expired keys, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub vacuum_interval_ms: u64,

    /// Interval between reports of the live keys, in milliseconds.
    #[clap(long, default_value_t = 5000)]
    pub report_interval_ms: u64,

    /// How long shutdown waits for a running ticker handler. 0 waits forever.
    #[clap(long, default_value_t = 2000)]
    pub stop_timeout_ms: u64,

    /// Print the Prometheus metrics to stdout on exit.
    #[clap(long)]
    pub dump_metrics: bool,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            ttl_ms: args.ttl_ms,
            vacuum_interval_ms: args.vacuum_interval_ms,
            report_interval_ms: args.report_interval_ms,
            stop_timeout_ms: args.stop_timeout_ms,
        }
    }
}

fn report(counter: &TtlCounter) {
    let keys = counter.keys();
    metrics::set_counter_keys(keys.len());

    let mut live: Vec<(String, u64)> = keys
        .into_iter()
        .map(|key| {
            let value = counter.get(&key);
            (key, value)
        })
        .filter(|(_, value)| *value > 0)
        .collect();
    live.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let top: Vec<String> = live
        .iter()
        .take(REPORT_TOP_KEYS)
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    info!("{} live keys [{}]", live.len(), top.join(", "));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&CliConfig::from(&cli_args), file_config)?;
    info!("Starting with {:?}", config);

    metrics::init_metrics();

    let counter = Arc::new(TtlCounter::manual(config.counter.ttl));
    let stop_timeout = config.ticker.stop_timeout.unwrap_or_default();

    let vacuum_counter = Arc::clone(&counter);
    let vacuum = Ticker::builder("vacuum", config.counter.vacuum_interval)
        .stop_timeout(stop_timeout)
        .metrics(Arc::new(PrometheusTickerMetrics))
        .build(move || {
            vacuum_counter.vacuum(Instant::now());
            anyhow::Ok(())
        })?;

    let report_counter = Arc::clone(&counter);
    let reporter = Ticker::builder("report", config.ticker.report_interval)
        .stop_timeout(stop_timeout)
        .metrics(Arc::new(PrometheusTickerMetrics))
        .build(move || {
            report(&report_counter);
            anyhow::Ok(())
        })?;

    vacuum.start();
    reporter.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        for key in line.split_whitespace() {
                            counter.inc(key);
                        }
                    }
                    None => {
                        info!("End of input");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    vacuum.stop().await;
    reporter.stop().await;
    report(&counter);
    counter.close();

    if cli_args.dump_metrics {
        print!("{}", metrics::render()?);
    }

    Ok(())
}
