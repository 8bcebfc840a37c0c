use super::expiry_queue::ExpiryQueue;
use crate::metrics;
use chrono::TimeDelta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// TTL applied when a non-positive one is requested.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// How often the background sweep runs unless told otherwise.
pub const DEFAULT_VACUUM_INTERVAL: Duration = Duration::from_secs(1);

/// Longest TTL and sweep interval a counter uses. Longer ones are clamped so
/// deadlines can always be computed from an `Instant`.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Item {
    value: u64,
    last_access: Instant,
}

impl Item {
    fn expires_at(&self, ttl: Duration) -> Instant {
        self.last_access + ttl
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        self.expires_at(ttl) <= now
    }
}

/// Everything guarded by the counter lock.
#[derive(Debug)]
struct CounterState {
    items: HashMap<String, Item>,
    ttl: Duration,
    queue: ExpiryQueue,
}

impl CounterState {
    fn new(ttl: Duration) -> Self {
        Self {
            items: HashMap::new(),
            ttl,
            queue: ExpiryQueue::new(),
        }
    }

    fn schedule(&mut self, key: &str, now: Instant) {
        let expire_at = now + self.ttl;
        if !self.queue.fix_key(key, expire_at) {
            self.queue.push(key, expire_at);
        }
    }

    fn vacuum(&mut self, now: Instant) -> usize {
        let mut evicted = 0;

        while let Some(expire_at) = self.queue.peek_min().map(|(_, at)| at) {
            if expire_at > now {
                break;
            }
            let Some((key, expire_at)) = self.queue.pop_min() else {
                break;
            };

            // Entries for deleted keys are simply dropped.
            let Some(item) = self.items.get(&key) else {
                continue;
            };

            let scheduled = item.expires_at(self.ttl);
            if scheduled <= expire_at {
                self.items.remove(&key);
                evicted += 1;
            } else {
                self.queue.push(key, scheduled);
            }
        }

        evicted
    }
}

fn coerce_ttl(ttl: Duration) -> Duration {
    if ttl.is_zero() {
        DEFAULT_TTL
    } else {
        ttl.min(MAX_TTL)
    }
}

fn coerce_vacuum_interval(interval: Duration) -> Duration {
    if interval.is_zero() {
        DEFAULT_VACUUM_INTERVAL
    } else {
        interval.min(MAX_TTL)
    }
}

/// One sweep over `state`, shared by the background task and
/// [`TtlCounter::vacuum`].
fn vacuum_state(state: &Mutex<CounterState>, now: Instant) -> usize {
    let evicted = state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .vacuum(now);
    if evicted > 0 {
        debug!("TTL counter vacuum removed {} expired keys", evicted);
        metrics::record_counter_evictions(evicted);
    }
    evicted
}

fn signed_remaining(deadline: Instant, now: Instant) -> TimeDelta {
    if deadline >= now {
        TimeDelta::from_std(deadline - now).unwrap_or(TimeDelta::MAX)
    } else {
        -TimeDelta::from_std(now - deadline).unwrap_or(TimeDelta::MAX)
    }
}

/// Thread-safe map of string keys to counters that expire after a period of
/// inactivity.
///
/// Reads mask expired entries immediately; a background sweep physically
/// removes them, driven by an [`ExpiryQueue`] so each pass only looks at keys
/// that are actually due.
///
/// Useful for rate limiting or tracking recent activity, where only recent
/// events matter.
#[derive(Debug)]
pub struct TtlCounter {
    state: Arc<Mutex<CounterState>>,
    shutdown_token: CancellationToken,
}

impl TtlCounter {
    /// Create a counter and start its background sweep.
    ///
    /// A zero `ttl` is replaced by [`DEFAULT_TTL`]; one above [`MAX_TTL`] is
    /// clamped to it.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        Self::with_vacuum_interval(ttl, DEFAULT_VACUUM_INTERVAL)
    }

    /// Like [`TtlCounter::new`] with a custom sweep period.
    ///
    /// A zero `vacuum_interval` is replaced by [`DEFAULT_VACUUM_INTERVAL`].
    pub fn with_vacuum_interval(ttl: Duration, vacuum_interval: Duration) -> Self {
        let counter = Self {
            state: Arc::new(Mutex::new(CounterState::new(coerce_ttl(ttl)))),
            shutdown_token: CancellationToken::new(),
        };

        spawn_sweep(
            Arc::clone(&counter.state),
            coerce_vacuum_interval(vacuum_interval),
            counter.shutdown_token.clone(),
        );

        counter
    }

    /// Create a counter without a background sweep.
    ///
    /// Expired entries are still masked on read, but nothing is physically
    /// removed until the caller runs [`TtlCounter::vacuum`] itself, e.g. from
    /// a [`crate::ticker::Ticker`]. Does not need a tokio runtime.
    pub fn manual(ttl: Duration) -> Self {
        let shutdown_token = CancellationToken::new();
        shutdown_token.cancel();
        Self {
            state: Arc::new(Mutex::new(CounterState::new(coerce_ttl(ttl)))),
            shutdown_token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        // TTLs are clamped to MAX_TTL, so no deadline arithmetic can panic
        // half way through a mutation.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys physically present, expired or not.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Snapshot of the keys physically present, in no particular order.
    ///
    /// Like [`TtlCounter::len`], this does not filter out keys that have
    /// expired but were not swept yet.
    pub fn keys(&self) -> Vec<String> {
        self.lock().items.keys().cloned().collect()
    }

    /// Increment `key`, creating it at 1 when absent or expired, and refresh
    /// its last access time.
    pub fn inc(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.lock();
        let ttl = state.ttl;

        match state.items.get_mut(key) {
            Some(item) => {
                if item.is_expired(ttl, now) {
                    item.value = 0;
                }
                item.value = item.value.saturating_add(1);
                item.last_access = now;
            }
            None => {
                state.items.insert(
                    key.to_owned(),
                    Item {
                        value: 1,
                        last_access: now,
                    },
                );
            }
        }

        state.schedule(key, now);
    }

    /// Current value of `key`, or 0 when absent or expired.
    ///
    /// Does not refresh the last access time.
    pub fn get(&self, key: &str) -> u64 {
        let now = Instant::now();
        let state = self.lock();
        state
            .items
            .get(key)
            .filter(|item| !item.is_expired(state.ttl, now))
            .map_or(0, |item| item.value)
    }

    /// Current value of `key`, refreshing its last access time.
    ///
    /// Returns 0 and refreshes nothing when the key is absent or expired.
    pub fn touch(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut state = self.lock();
        let ttl = state.ttl;

        let value = match state.items.get_mut(key) {
            Some(item) if !item.is_expired(ttl, now) => {
                item.last_access = now;
                item.value
            }
            _ => return 0,
        };

        state.schedule(key, now);
        value
    }

    /// Remove `key`. Removing an absent key is a no-op.
    ///
    /// The key's queue entry stays behind and is discarded by the next sweep
    /// that reaches it.
    pub fn del(&self, key: &str) {
        self.lock().items.remove(key);
    }

    /// Set `key` back to 0 and refresh its last access time, if present.
    pub fn reset(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.lock();

        let Some(item) = state.items.get_mut(key) else {
            return;
        };
        item.value = 0;
        item.last_access = now;

        state.schedule(key, now);
    }

    /// Time left before `key` expires.
    ///
    /// Negative once the deadline has passed but the key was not swept yet;
    /// zero when the key is absent.
    pub fn expire(&self, key: &str) -> TimeDelta {
        let now = Instant::now();
        let state = self.lock();
        state
            .items
            .get(key)
            .map_or(TimeDelta::zero(), |item| {
                signed_remaining(item.expires_at(state.ttl), now)
            })
    }

    pub fn ttl(&self) -> Duration {
        self.lock().ttl
    }

    /// Change the TTL. A zero `ttl` is replaced by [`DEFAULT_TTL`]; one above
    /// [`MAX_TTL`] is clamped to it.
    ///
    /// Pending expirations are re-anchored to each key's last access, so a key
    /// touched 3s ago under a new 5s TTL expires in 2s.
    pub fn set_ttl(&self, ttl: Duration) {
        let ttl = coerce_ttl(ttl);
        let mut state = self.lock();

        let old_ttl = state.ttl;
        if old_ttl == ttl {
            return;
        }
        state.ttl = ttl;
        state.queue.rebuild(old_ttl, ttl);
    }

    /// Physically remove every key whose expiration is due at `now`.
    ///
    /// Returns how many keys were removed. Called by the background sweep,
    /// and safe to call from any other scheduler.
    pub fn vacuum(&self, now: Instant) -> usize {
        vacuum_state(&self.state, now)
    }

    /// Stop the background sweep. Safe to call more than once.
    ///
    /// Entries left in memory are still masked on read once expired.
    pub fn close(&self) {
        self.shutdown_token.cancel();
    }

    /// Whether the background sweep is stopped (always true for
    /// [`TtlCounter::manual`] counters).
    pub fn is_closed(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}

impl Drop for TtlCounter {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

fn spawn_sweep(
    state: Arc<Mutex<CounterState>>,
    vacuum_interval: Duration,
    shutdown_token: CancellationToken,
) {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + vacuum_interval;
        let mut ticker = tokio::time::interval_at(start, vacuum_interval);

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("TTL counter sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    vacuum_state(&state, Instant::now());
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_inc_and_get() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.inc("a");
        counter.inc("a");
        assert_eq!(counter.get("a"), 3);
        assert_eq!(counter.get("missing"), 0);
    }

    #[test]
    fn test_zero_ttl_uses_default() {
        let counter = TtlCounter::manual(Duration::ZERO);
        assert_eq!(counter.ttl(), DEFAULT_TTL);

        counter.set_ttl(secs(5));
        counter.set_ttl(Duration::ZERO);
        assert_eq!(counter.ttl(), DEFAULT_TTL);
    }

    #[test]
    fn test_vacuum_removes_only_due_keys() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.inc("b");

        assert_eq!(counter.vacuum(Instant::now()), 0);
        assert_eq!(counter.len(), 2);

        assert_eq!(counter.vacuum(Instant::now() + secs(11)), 2);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_vacuum_skips_refreshed_key() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        let first_deadline = Instant::now() + secs(10);

        std::thread::sleep(Duration::from_millis(20));
        counter.touch("a");

        // The first deadline passed but the key was refreshed after it was set.
        assert_eq!(counter.vacuum(first_deadline), 0);
        assert_eq!(counter.get("a"), 1);
        assert!(counter.lock().queue.contains("a"));
    }

    #[test]
    fn test_vacuum_drops_entries_of_deleted_keys() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.del("a");
        assert_eq!(counter.lock().queue.len(), 1);

        assert_eq!(counter.vacuum(Instant::now() + secs(11)), 0);
        assert!(counter.lock().queue.is_empty());
    }

    #[test]
    fn test_reinsert_after_delete_keeps_one_entry() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.del("a");
        counter.inc("a");

        assert_eq!(counter.get("a"), 1);
        assert_eq!(counter.lock().queue.len(), 1);
    }

    #[test]
    fn test_reset_keeps_key_scheduled() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.inc("a");
        counter.reset("a");

        assert_eq!(counter.get("a"), 0);
        assert_eq!(counter.len(), 1);
        assert_eq!(counter.vacuum(Instant::now() + secs(11)), 1);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_reset_missing_key_is_noop() {
        let counter = TtlCounter::manual(secs(10));
        counter.reset("missing");
        assert!(counter.is_empty());
    }

    #[test]
    fn test_set_ttl_reschedules_existing_keys() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");

        counter.set_ttl(secs(1));
        assert_eq!(counter.vacuum(Instant::now() + Duration::from_millis(1500)), 1);
    }

    #[test]
    fn test_set_ttl_longer_delays_sweep() {
        let counter = TtlCounter::manual(secs(1));
        counter.inc("a");

        counter.set_ttl(secs(10));
        assert_eq!(counter.vacuum(Instant::now() + secs(2)), 0);
        assert_eq!(counter.get("a"), 1);
    }

    #[test]
    fn test_expire_of_missing_key_is_zero() {
        let counter = TtlCounter::manual(secs(10));
        assert_eq!(counter.expire("missing"), TimeDelta::zero());
    }

    #[test]
    fn test_signed_remaining() {
        let now = Instant::now();
        assert_eq!(signed_remaining(now + secs(2), now), TimeDelta::seconds(2));
        assert_eq!(signed_remaining(now, now + secs(2)), TimeDelta::seconds(-2));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let counter = TtlCounter::manual(Duration::MAX);
        assert_eq!(counter.ttl(), MAX_TTL);

        counter.inc("a");
        assert_eq!(counter.get("a"), 1);
        assert_eq!(counter.touch("a"), 1);
        assert!(counter.expire("a") > TimeDelta::days(365));
        assert_eq!(counter.vacuum(Instant::now()), 0);
    }

    #[test]
    fn test_set_ttl_to_huge_value_keeps_counter_usable() {
        let counter = TtlCounter::manual(secs(10));
        counter.inc("a");
        counter.inc("b");

        counter.set_ttl(Duration::MAX);
        assert_eq!(counter.ttl(), MAX_TTL);
        assert_eq!(counter.get("a"), 1);

        counter.inc("a");
        assert_eq!(counter.get("a"), 2);

        counter.set_ttl(secs(1));
        assert_eq!(counter.vacuum(Instant::now() + secs(2)), 2);
        assert!(counter.is_empty());
    }

    #[tokio::test]
    async fn test_huge_vacuum_interval_is_clamped() {
        let counter = TtlCounter::with_vacuum_interval(secs(1), Duration::MAX);
        counter.inc("a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.get("a"), 1);
        counter.close();
    }

    #[test]
    fn test_manual_counter_is_closed() {
        let counter = TtlCounter::manual(secs(1));
        assert!(counter.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let counter = TtlCounter::new(secs(1));
        assert!(!counter.is_closed());
        counter.close();
        counter.close();
        assert!(counter.is_closed());
    }
}
