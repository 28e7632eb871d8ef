//! OpenFlow Switch Common - Shared types for the software switch dataplane
//!
//! This crate provides the protocol-level vocabulary shared by the
//! dataplane and whatever control-channel layer embeds it:
//! - Reserved port, group, table and buffer identifiers
//! - The transport 4-tuple used for flow telemetry
//! - The control-plane error taxonomy
//! - Timestamps and lock-free counters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flow;
pub mod ofp;

pub use error::*;
pub use flow::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock nanosecond timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Get current timestamp (nanoseconds since epoch)
    #[inline(always)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self(nanos)
    }

    /// Build from raw nanoseconds
    #[inline(always)]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get nanoseconds value
    #[inline(always)]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed between `earlier` and `self`, zero if `earlier` is later
    #[inline(always)]
    pub fn nanos_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whole seconds elapsed between `earlier` and `self`
    #[inline(always)]
    pub fn secs_since(&self, earlier: Timestamp) -> u64 {
        self.nanos_since(earlier) / 1_000_000_000
    }

    /// Timestamp shifted forward by `millis`
    #[inline(always)]
    pub fn add_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis.saturating_mul(1_000_000)))
    }
}

/// High-performance counter for lock-free metrics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::from_nanos(1_000_000_000);
        let t2 = t1.add_millis(2_500);

        assert_eq!(t2.nanos_since(t1), 2_500_000_000);
        assert_eq!(t2.secs_since(t1), 2);
        // Saturates instead of wrapping
        assert_eq!(t1.nanos_since(t2), 0);
    }

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.get(), 2);
    }
}
