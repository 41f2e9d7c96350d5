//! Per-client request log.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::window::{RateLimitDecision, WindowConfig};

/// Admitted request timestamps for one client key.
#[derive(Debug, Clone, Default)]
struct ClientWindow {
    /// Arrival-ordered admission timestamps (ms)
    timestamps: Vec<u64>,
    /// Last time this key was checked, for eviction ordering
    last_seen_ms: u64,
}

impl ClientWindow {
    /// Drop expired timestamps, decide, and record on admission.
    fn admit(&mut self, now_ms: u64, window: &WindowConfig) -> RateLimitDecision {
        self.last_seen_ms = now_ms;
        self.timestamps.retain(|&ts| window.is_live(ts, now_ms));

        let count = self.timestamps.len() as u64;
        if count >= window.max_requests() {
            let retry_after_ms = self
                .timestamps
                .first()
                .map(|&oldest| oldest.saturating_add(window.window_ms()).saturating_sub(now_ms));
            return RateLimitDecision {
                allowed: false,
                count,
                remaining: 0,
                retry_after_ms,
            };
        }

        self.timestamps.push(now_ms);
        RateLimitDecision {
            allowed: true,
            count: count + 1,
            remaining: window.max_requests() - count - 1,
            retry_after_ms: None,
        }
    }

    fn live_count(&self, now_ms: u64, window: &WindowConfig) -> u64 {
        self.timestamps
            .iter()
            .filter(|&&ts| window.is_live(ts, now_ms))
            .count() as u64
    }
}

/// Sharded map from client key to its admission timestamps.
///
/// The prune-decide-record sequence for a key runs under that key's shard
/// lock, so concurrent checks for one key cannot overshoot the budget.
pub struct RequestLog {
    entries: DashMap<String, ClientWindow>,
    max_keys: Option<usize>,
    trimming: AtomicBool,
    eviction_passes: AtomicUsize,
}

impl RequestLog {
    /// Create a log, optionally bounded to `max_keys` tracked clients.
    pub fn new(max_keys: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            max_keys,
            trimming: AtomicBool::new(false),
            eviction_passes: AtomicUsize::new(0),
        }
    }

    /// Run one admission check for `key` at `now_ms`.
    pub fn record(&self, key: &str, now_ms: u64, window: &WindowConfig) -> RateLimitDecision {
        if let Some(mut client) = self.entries.get_mut(key) {
            return client.admit(now_ms, window);
        }

        let (decision, inserted) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => (occupied.get_mut().admit(now_ms, window), false),
            Entry::Vacant(vacant) => {
                let mut client = ClientWindow::default();
                let decision = client.admit(now_ms, window);
                vacant.insert(client);
                (decision, true)
            }
        };

        // Shard guards are released here; eviction may touch any shard.
        if inserted {
            trace!(key = %key, "Tracking new client key");
            self.enforce_capacity(key, now_ms, window);
        }

        decision
    }

    /// Number of live timestamps for `key` without modifying the log.
    pub fn live_count(&self, key: &str, now_ms: u64, window: &WindowConfig) -> u64 {
        self.entries
            .get(key)
            .map(|client| client.live_count(now_ms, window))
            .unwrap_or(0)
    }

    /// Remove every key with no live timestamps. Returns how many were removed.
    pub fn sweep(&self, now_ms: u64, window: &WindowConfig) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, client| {
            client.timestamps.retain(|&ts| window.is_live(ts, now_ms));
            !client.timestamps.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }

    /// Forget a single key.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of capacity trims performed so far.
    pub fn eviction_passes(&self) -> usize {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    /// Trim the log once it grows past `max_keys`.
    ///
    /// A trim brings the log down to a low-water mark `max_keys / 10` below
    /// the cap, so the full pass runs at most once per that many new keys.
    /// Keys with an empty window go first; after that the least recently
    /// checked keys other than `keep` are evicted. Only one thread trims at
    /// a time; others skip and may leave the log briefly over the cap.
    fn enforce_capacity(&self, keep: &str, now_ms: u64, window: &WindowConfig) {
        let Some(max_keys) = self.max_keys else {
            return;
        };
        if self.entries.len() <= max_keys {
            return;
        }
        if self.trimming.swap(true, Ordering::AcqRel) {
            return;
        }

        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
        let low_water = max_keys.saturating_sub((max_keys / 10).max(1));

        let swept = self.sweep(now_ms, window);
        let excess = self.entries.len().saturating_sub(low_water);

        let mut evicted = 0;
        if excess > 0 {
            let mut candidates: Vec<(u64, String)> = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .map(|entry| (entry.value().last_seen_ms, entry.key().clone()))
                .collect();

            if excess < candidates.len() {
                candidates.select_nth_unstable_by_key(excess, |(seen, _)| *seen);
                candidates.truncate(excess);
            }

            for (seen, key) in candidates {
                // Skip keys checked again since the snapshot
                if self
                    .entries
                    .remove_if(&key, |_, client| client.last_seen_ms == seen)
                    .is_some()
                {
                    evicted += 1;
                }
            }
        }

        self.trimming.store(false, Ordering::Release);
        debug!(
            swept,
            evicted,
            remaining = self.entries.len(),
            "Trimmed client keys at capacity"
        );
    }
}
