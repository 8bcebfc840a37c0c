use super::diagnostics::{DiagnosticSink, TracingSink};
use super::handler::{TickHandler, TickerError};
use super::metrics::TickerMetrics;
use chrono::Utc;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Longest timer period the loop schedules. Longer intervals never tick in
/// practice, but must not overflow the timer's deadline arithmetic.
const MAX_TIMER_PERIOD: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Lifecycle handles of the active execution loop.
#[derive(Default)]
struct Control {
    /// Single-slot stop signal. Taken by the `stop` call that delivers it.
    stop_tx: Option<mpsc::Sender<()>>,
    /// Cancelled by the loop once it has exited.
    finished: Option<CancellationToken>,
}

struct TickerShared {
    name: String,
    interval: Duration,
    stop_timeout: Option<Duration>,
    handler: Arc<dyn TickHandler>,
    metrics: Option<Arc<dyn TickerMetrics>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    running: AtomicBool,
    control: Mutex<Control>,
}

impl TickerShared {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn debug(&self, message: &str) {
        self.diagnostics.debug(&format!("{}: {}", self.name, message));
    }

    fn error(&self, message: &str) {
        self.diagnostics.error(&format!("{}: {}", self.name, message));
    }

    /// Run the handler once, containing errors and panics.
    async fn execute_handler(&self) {
        let started_at = Utc::now();
        let clock = Instant::now();

        let handler = Arc::clone(&self.handler);
        let succeeded = match tokio::task::spawn_blocking(move || handler.handle()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.error(&format!("{:#}", e));
                false
            }
            Err(e) if e.is_panic() => {
                self.error(&format!("handler panic: {}", panic_message(e.into_panic())));
                false
            }
            Err(e) => {
                self.error(&e.to_string());
                false
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe(&self.name, started_at, clock.elapsed(), succeeded);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Marks the ticker stopped when the loop exits, including by panic.
struct LoopGuard {
    shared: Arc<TickerShared>,
    finished: CancellationToken,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        {
            let mut control = self.shared.lock_control();
            control.stop_tx = None;
            control.finished = None;
            self.shared.running.store(false, Ordering::SeqCst);
        }
        self.finished.cancel();
    }
}

async fn run_loop(
    shared: Arc<TickerShared>,
    mut stop_rx: mpsc::Receiver<()>,
    finished: CancellationToken,
) {
    let _guard = LoopGuard {
        shared: Arc::clone(&shared),
        finished,
    };

    let period = shared.interval.min(MAX_TIMER_PERIOD);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                shared.debug("quit...");
                break;
            }
            _ = ticker.tick() => {
                shared.execute_handler().await;
            }
        }
    }
}

/// Configures a [`Ticker`].
pub struct TickerBuilder {
    name: String,
    interval: Duration,
    stop_timeout: Option<Duration>,
    metrics: Option<Arc<dyn TickerMetrics>>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl TickerBuilder {
    /// Bound how long `stop` waits for an in-flight handler.
    ///
    /// `Duration::ZERO` (the default) waits indefinitely.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn TickerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Where lifecycle and failure messages go. Defaults to [`TracingSink`].
    pub fn diagnostics(mut self, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Create the ticker in the stopped state.
    pub fn build(self, handler: impl TickHandler) -> Result<Ticker, TickerError> {
        if self.interval.is_zero() {
            return Err(TickerError::ZeroInterval(self.name));
        }

        Ok(Ticker {
            shared: Arc::new(TickerShared {
                name: self.name,
                interval: self.interval,
                stop_timeout: self.stop_timeout,
                handler: Arc::new(handler),
                metrics: self.metrics,
                diagnostics: self.diagnostics,
                running: AtomicBool::new(false),
                control: Mutex::new(Control::default()),
            }),
        })
    }
}

/// Runs a handler at a fixed interval on a background task.
///
/// Start and stop can be called any number of times, concurrently, from any
/// task: concurrent starts spawn a single loop and concurrent stops deliver a
/// single stop signal. Handler invocations never overlap; a slow handler
/// delays the ticks after it. Handler errors and panics are logged through
/// the diagnostic sink and never stop the loop.
///
/// Clones share the same loop. The loop does not stop when the handles are
/// dropped: call [`Ticker::stop`] first, or it keeps ticking until the
/// runtime shuts down.
#[derive(Clone)]
pub struct Ticker {
    shared: Arc<TickerShared>,
}

impl Ticker {
    pub fn builder(name: impl Into<String>, interval: Duration) -> TickerBuilder {
        TickerBuilder {
            name: name.into(),
            interval,
            stop_timeout: None,
            metrics: None,
            diagnostics: Arc::new(TracingSink),
        }
    }

    /// Build a ticker with default options and start it right away.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn spawn(
        name: impl Into<String>,
        handler: impl TickHandler,
        interval: Duration,
    ) -> Result<Self, TickerError> {
        let ticker = Self::builder(name, interval).build(handler)?;
        ticker.start();
        Ok(ticker)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Spawn the execution loop. The first tick fires one interval from now.
    ///
    /// Does nothing but log when the loop is already running.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn start(&self) {
        let (stop_rx, finished) = {
            let mut control = self.shared.lock_control();
            if self.shared.running.load(Ordering::SeqCst) {
                drop(control);
                self.shared.debug("already been started");
                return;
            }

            let (stop_tx, stop_rx) = mpsc::channel(1);
            let finished = CancellationToken::new();
            control.stop_tx = Some(stop_tx);
            control.finished = Some(finished.clone());
            self.shared.running.store(true, Ordering::SeqCst);
            (stop_rx, finished)
        };

        tokio::spawn(run_loop(Arc::clone(&self.shared), stop_rx, finished));
    }

    /// Signal the loop to stop and wait for the in-flight handler to return.
    ///
    /// With a stop timeout the wait is abandoned after the timeout: the
    /// handler keeps running and the ticker reports itself running until it
    /// returns. Only the first of several concurrent calls waits; the others
    /// return immediately.
    pub async fn stop(&self) {
        let finished = {
            let mut control = self.shared.lock_control();
            if !self.shared.running.load(Ordering::SeqCst) {
                drop(control);
                self.shared.debug("is not running");
                return;
            }

            let delivered = match &control.stop_tx {
                Some(stop_tx) => stop_tx.try_send(()).is_ok(),
                None => false,
            };
            if delivered {
                control.stop_tx = None;
            }

            match control.finished.clone() {
                Some(finished) if delivered => finished,
                _ => {
                    drop(control);
                    self.shared.debug("close already been called");
                    return;
                }
            }
        };

        match self.shared.stop_timeout {
            None => finished.cancelled().await,
            Some(timeout) => {
                if tokio::time::timeout(timeout, finished.cancelled())
                    .await
                    .is_err()
                {
                    self.shared.error("forced shutdown due to timeout");
                }
            }
        }
    }
}
