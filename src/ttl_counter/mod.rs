//! Counters that expire after a period of inactivity.
//!
//! Expiration is enforced lazily on read and physically by a sweep that walks
//! an expiration-ordered heap, so a sweep only touches keys that are due.

mod counter;
mod expiry_queue;

pub use counter::{TtlCounter, DEFAULT_TTL, DEFAULT_VACUUM_INTERVAL, MAX_TTL};
pub use expiry_queue::ExpiryQueue;
