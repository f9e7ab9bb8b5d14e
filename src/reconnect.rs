//! Time-ordered reconnect scheduling (§4.D).
//!
//! Nodes that have dropped their socket sit here until their backoff
//! deadline elapses, at which point `handle_io`'s drain step pulls them out
//! and attempts a fresh `connect()`.

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Backoff ceiling used when no tighter bound is configured.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// `min(max_backoff_ms, (100 * attempt)^2)` milliseconds, per §4.D. Attempt
/// numbers start at 1; attempt 0 is treated the same as attempt 1 so a
/// first scheduled reconnect always has *some* delay.
pub fn backoff_delay(attempt: u32, max_backoff_ms: u64) -> Duration {
    let attempt = attempt.max(1) as u64;
    let scaled = 100u64.saturating_mul(attempt);
    let squared = scaled.saturating_mul(scaled);
    Duration::from_millis(squared.min(max_backoff_ms))
}

#[derive(Debug, Eq, PartialEq)]
struct Entry {
    deadline: Instant,
    node_id: usize,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: BinaryHeap is a max-heap, we want the earliest deadline.
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of pending reconnects ordered by deadline.
#[derive(Default)]
pub struct ReconnectScheduler {
    heap: BinaryHeap<Entry>,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn schedule(&mut self, node_id: usize, attempt: u32, max_backoff_ms: u64) {
        let deadline = Instant::now() + backoff_delay(attempt, max_backoff_ms);
        self.heap.push(Entry { deadline, node_id });
    }

    /// Schedule an immediate reconnect attempt (used on first failure,
    /// attempt 0 -> attempt 1 backoff still applies per `backoff_delay`).
    pub fn schedule_next(&mut self, node_id: usize, prior_attempt: u32, max_backoff_ms: u64) {
        self.schedule(node_id, prior_attempt + 1, max_backoff_ms);
    }

    /// How long until the next deadline, or `None` if nothing is pending.
    /// Used to bound the selector's poll timeout.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.heap.peek().map(|e| {
            let now = Instant::now();
            if e.deadline <= now {
                Duration::ZERO
            } else {
                e.deadline - now
            }
        })
    }

    /// Pop every node whose deadline has elapsed, in deadline order.
    pub fn drain_ready(&mut self) -> Vec<usize> {
        let now = Instant::now();
        let mut ready = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            ready.push(self.heap.pop().unwrap().node_id);
        }
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
