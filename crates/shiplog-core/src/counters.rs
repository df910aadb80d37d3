//! Pipeline-wide throughput counters.
//!
//! One [`ProcessCounters`] is built per pipeline and handed to every source
//! as an `Arc`. All mutation is a single atomic add; reads are plain loads.
//! The counters carry no ordering relationship with any other data, so
//! `Relaxed` is sufficient throughout.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ProcessCounters {
    active_connections: AtomicI64,
    messages: AtomicU64,
}

impl ProcessCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` to the total record count and return the new total.
    pub fn increment_message_count(&self, n: u64) -> u64 {
        self.messages.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Adjust the active connection count by `delta` and return the new value.
    pub fn add_connections(&self, delta: i64) -> i64 {
        self.active_connections.fetch_add(delta, Ordering::Relaxed) + delta
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Count one connection as active until the returned guard is dropped.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.add_connections(1);
        ConnectionGuard {
            counters: Arc::clone(self),
        }
    }
}

/// Decrements the active connection count on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<ProcessCounters>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.add_connections(-1);
    }
}
