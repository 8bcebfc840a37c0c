//! Min-heap of key expirations.
//!
//! The queue keeps one entry per key, ordered by expiration instant, and
//! tracks each key's position in the heap so an entry can be rescheduled in
//! place without scanning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Expiration {
    key: String,
    expire_at: Instant,
}

/// Priority queue of `(key, expire_at)` pairs with the earliest expiration on top.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    entries: Vec<Expiration>,
    /// Heap index of every key in `entries`.
    positions: HashMap<String, usize>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Schedule `key` to expire at `expire_at`.
    ///
    /// A key that is already queued is rescheduled instead of duplicated.
    pub fn push(&mut self, key: impl Into<String>, expire_at: Instant) {
        let key = key.into();
        if self.fix_key(&key, expire_at) {
            return;
        }

        let idx = self.entries.len();
        self.positions.insert(key.clone(), idx);
        self.entries.push(Expiration { key, expire_at });
        self.sift_up(idx);
    }

    /// The entry that expires first, if any.
    pub fn peek_min(&self) -> Option<(&str, Instant)> {
        self.entries
            .first()
            .map(|entry| (entry.key.as_str(), entry.expire_at))
    }

    /// Remove and return the entry that expires first.
    pub fn pop_min(&mut self) -> Option<(String, Instant)> {
        if self.entries.is_empty() {
            return None;
        }

        let last = self.entries.len() - 1;
        self.swap(0, last);
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.key);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }

        Some((entry.key, entry.expire_at))
    }

    /// Move an already queued key to a new expiration instant.
    ///
    /// Returns `false` when the key is not in the queue.
    pub fn fix_key(&mut self, key: &str, expire_at: Instant) -> bool {
        let Some(&idx) = self.positions.get(key) else {
            return false;
        };

        let previous = self.entries[idx].expire_at;
        self.entries[idx].expire_at = expire_at;
        if expire_at < previous {
            self.sift_up(idx);
        } else {
            self.sift_down(idx);
        }
        true
    }

    /// Re-anchor every entry after a TTL change.
    ///
    /// Each entry was scheduled as `last_access + old_ttl`; it becomes
    /// `last_access + new_ttl`, so the time elapsed since the last access is
    /// preserved rather than restarted.
    ///
    /// # Panics
    ///
    /// Panics if `last_access + new_ttl` overflows an `Instant`. Counters
    /// clamp their TTLs so it cannot. The subtraction itself never fails for
    /// entries scheduled as `last_access + old_ttl`.
    pub fn rebuild(&mut self, old_ttl: Duration, new_ttl: Duration) {
        for entry in &mut self.entries {
            let last_access = entry.expire_at - old_ttl;
            entry.expire_at = last_access + new_ttl;
        }

        for idx in (0..self.entries.len() / 2).rev() {
            self.sift_down(idx);
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        if let Some(pos) = self.positions.get_mut(&self.entries[a].key) {
            *pos = a;
        }
        if let Some(pos) = self.positions.get_mut(&self.entries[b].key) {
            *pos = b;
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].expire_at >= self.entries[parent].expire_at {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut earliest = idx;

            if left < len && self.entries[left].expire_at < self.entries[earliest].expire_at {
                earliest = left;
            }
            if right < len && self.entries[right].expire_at < self.entries[earliest].expire_at {
                earliest = right;
            }
            if earliest == idx {
                break;
            }
            self.swap(idx, earliest);
            idx = earliest;
        }
    }
}
