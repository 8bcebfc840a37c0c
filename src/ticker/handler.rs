use thiserror::Error;

/// Work executed by a [`super::Ticker`] on every tick.
///
/// Handlers run on the blocking thread pool, one call at a time. They may
/// block for as long as they need; a stuck handler only delays the next tick
/// and bounds nothing but the caller of `stop` (see `stop_timeout`).
///
/// Any closure returning `anyhow::Result<()>` is a handler.
pub trait TickHandler: Send + Sync + 'static {
    fn handle(&self) -> anyhow::Result<()>;
}

impl<F> TickHandler for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Errors raised while configuring a ticker.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("{0}: interval must be greater than zero")]
    ZeroInterval(String),
}
