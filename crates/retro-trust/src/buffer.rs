//! C2 — lock-minimising trust-update buffer.
//!
//! Coalesces updates destined for a [`TrustTracker`] and flushes them in one batch once either the
//! buffer fills or an interval elapses, trading a small amount of staleness for far fewer lock
//! acquisitions on the tracker. Grounded on `trust_update_buffer.py`, including its exact
//! `auto_flushes` bookkeeping quirk (see [`TrustUpdateBuffer::maybe_auto_flush`]).

use crate::tracker::TrustTracker;
use retro_core::{RuleKey, TrustBufferConfig};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One pending update, queued until the next flush.
#[derive(Debug, Clone)]
struct PendingUpdate {
    key: RuleKey,
    succeeded: bool,
    weight: f64,
}

/// Counters describing the buffer's lifetime activity, returned by `get_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferStats {
    pub updates_buffered: u64,
    pub updates_flushed: u64,
    pub flush_operations: u64,
    pub auto_flushes: u64,
    pub manual_flushes: u64,
    pub current_buffer_size: usize,
    pub unique_keys: usize,
    pub avg_updates_per_flush: f64,
    pub buffer_utilization: f64,
}

struct Inner {
    pending: Vec<PendingUpdate>,
    last_flush: Instant,
}

/// Buffers updates for a single [`TrustTracker`]. Never a singleton: constructed owning (via
/// `Arc`) the tracker it flushes into, so a caller can run several independent buffer/tracker
/// pairs in the same process.
pub struct TrustUpdateBuffer {
    tracker: Arc<TrustTracker>,
    config: TrustBufferConfig,
    inner: Mutex<Inner>,
    updates_buffered: AtomicU64,
    updates_flushed: AtomicU64,
    flush_operations: AtomicU64,
    auto_flushes: AtomicU64,
    manual_flushes: AtomicU64,
}

impl TrustUpdateBuffer {
    pub fn new(tracker: Arc<TrustTracker>, config: TrustBufferConfig) -> Self {
        Self {
            tracker,
            config,
            inner: Mutex::new(Inner {
                pending: Vec::new(),
                last_flush: Instant::now(),
            }),
            updates_buffered: AtomicU64::new(0),
            updates_flushed: AtomicU64::new(0),
            flush_operations: AtomicU64::new(0),
            auto_flushes: AtomicU64::new(0),
            manual_flushes: AtomicU64::new(0),
        }
    }

    /// Queues a single update, then flushes if either trigger crosses. Returns whether a flush
    /// occurred.
    pub fn add_update(&self, key: RuleKey, succeeded: bool, weight: f64) -> bool {
        self.updates_buffered.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.pending.push(PendingUpdate { key, succeeded, weight });
        self.check_triggers(&mut inner)
    }

    /// Queues a batch of updates under one lock acquisition, then checks the triggers once.
    /// Returns whether a flush occurred.
    pub fn add_updates_batch(&self, updates: &[(RuleKey, bool, f64)]) -> bool {
        if updates.is_empty() {
            return false;
        }
        self.updates_buffered.fetch_add(updates.len() as u64, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner
            .pending
            .extend(updates.iter().map(|(k, s, w)| PendingUpdate { key: k.clone(), succeeded: *s, weight: *w }));
        self.check_triggers(&mut inner)
    }

    /// Checks the size/time triggers and flushes if either crossed. Matches the original's quirk:
    /// `auto_flushes` increments whenever the TIME trigger fires, even if the buffer was also over
    /// the SIZE threshold at that moment — the two triggers are independent bookkeeping, not
    /// mutually exclusive. A size-only trigger increments neither `auto_flushes` nor
    /// `manual_flushes`; only the explicit [`Self::flush`] call increments the latter.
    fn check_triggers(&self, inner: &mut Inner) -> bool {
        let interval = Duration::from_secs_f64(self.config.auto_flush_interval_sec);
        let time_to_flush = inner.last_flush.elapsed() >= interval;
        let size_to_flush = inner.pending.len() >= self.config.flush_threshold;
        if !time_to_flush && !size_to_flush {
            return false;
        }
        self.drain_locked(inner);
        if time_to_flush {
            self.auto_flushes.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Drains and aggregates whatever is queued, returning the number of events drained. A no-op
    /// (and not counted as a flush operation) when the buffer is empty.
    fn drain_locked(&self, inner: &mut Inner) -> usize {
        let count = inner.pending.len();
        if count == 0 {
            return 0;
        }
        let batch: Vec<PendingUpdate> = std::mem::take(&mut inner.pending);
        inner.last_flush = Instant::now();
        let aggregated = aggregate_updates(&batch);
        self.tracker.batch_update(&aggregated);
        self.flush_operations.fetch_add(1, Ordering::Relaxed);
        self.updates_flushed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Forces an immediate flush of whatever is currently queued. `manual_flushes` increments
    /// regardless of whether there was anything to drain; the return value is the number of
    /// events actually flushed.
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = self.drain_locked(&mut inner);
        self.manual_flushes.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Snapshot of the buffer's lifetime counters plus its current queue depth.
    pub fn get_stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        let current_buffer_size = inner.pending.len();
        let unique_keys = inner.pending.iter().map(|u| &u.key).collect::<std::collections::HashSet<_>>().len();
        drop(inner);

        let flush_operations = self.flush_operations.load(Ordering::Relaxed);
        let updates_flushed = self.updates_flushed.load(Ordering::Relaxed);
        let avg_updates_per_flush =
            if flush_operations > 0 { updates_flushed as f64 / flush_operations as f64 } else { 0.0 };
        let buffer_utilization =
            (current_buffer_size as f64 / self.config.max_buffer_size as f64 * 100.0).min(100.0);

        BufferStats {
            updates_buffered: self.updates_buffered.load(Ordering::Relaxed),
            updates_flushed,
            flush_operations,
            auto_flushes: self.auto_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
            current_buffer_size,
            unique_keys,
            avg_updates_per_flush,
            buffer_utilization,
        }
    }
}

/// Collapses same-key updates into one `(key, succeeded, weight)` triple per `(key, succeeded)`
/// pair by summing weights, so a burst of updates to the same rule costs one posterior mutation
/// instead of many. Order between distinct keys does not matter (α/β addition commutes).
fn aggregate_updates(batch: &[PendingUpdate]) -> Vec<(RuleKey, bool, f64)> {
    use std::collections::HashMap;
    let mut totals: HashMap<(RuleKey, bool), f64> = HashMap::new();
    let mut order: Vec<(RuleKey, bool)> = Vec::new();
    for update in batch {
        let entry_key = (update.key.clone(), update.succeeded);
        if !totals.contains_key(&entry_key) {
            order.push(entry_key.clone());
        }
        *totals.entry(entry_key).or_insert(0.0) += update.weight;
    }
    order
        .into_iter()
        .map(|(key, succeeded)| {
            let weight = totals[&(key.clone(), succeeded)];
            (key, succeeded, weight)
        })
        .collect()
}
