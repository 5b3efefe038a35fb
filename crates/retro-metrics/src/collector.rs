//! C4 — non-blocking async metrics collector.
//!
//! A single background worker drains a bounded queue into a [`MetricsStore`], retrying transient
//! failures with backoff before giving up and notifying error callbacks. Grounded on the teacher's
//! `BackgroundScheduler` (`crates/engine/src/background.rs`): bounded submission with an explicit
//! `BackpressureError`, a `catch_unwind`-wrapped worker so a panicking store attempt cannot kill the
//! drain thread, and lock-held-across-notify condvar signalling to avoid lost wakeups. This is an
//! intentional divergence from the original's unbounded `queue.Queue` (see design notes).

use crate::store::MetricsStore;
use crate::types::MetricRecord;
use retro_core::MetricsCollectorConfig;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Returned by `submit_metric` when the bounded queue is full.
#[derive(Debug)]
pub struct BackpressureError;

impl fmt::Display for BackpressureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metrics collector queue is full")
    }
}

impl std::error::Error for BackpressureError {}

type ErrorCallback = Box<dyn Fn(&MetricRecord, &str) + Send + Sync>;

/// Snapshot of collector activity, returned by `get_stats`.
#[derive(Debug, Clone, Copy)]
pub struct CollectorStats {
    pub metrics_submitted: u64,
    pub metrics_processed: u64,
    pub metrics_failed: u64,
    pub batches_processed: u64,
    pub processing_time: Duration,
    pub queue_size: usize,
    pub success_rate: f64,
    pub avg_batch_time: Duration,
}

struct Shared {
    queue: Mutex<VecDeque<MetricRecord>>,
    queue_ready: Condvar,
    drained: Condvar,
    shutdown: AtomicBool,
    finished: AtomicBool,
    capacity: usize,
    metrics_submitted: AtomicU64,
    metrics_processed: AtomicU64,
    metrics_failed: AtomicU64,
    batches_processed: AtomicU64,
    processing_time_micros: AtomicU64,
    callbacks: Mutex<Vec<ErrorCallback>>,
    store: Arc<MetricsStore>,
    config: MetricsCollectorConfig,
}

/// Non-blocking producer-facing handle over a bounded queue drained by one background thread.
pub struct AsyncMetricsCollector {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncMetricsCollector {
    pub fn new(store: Arc<MetricsStore>, config: MetricsCollectorConfig) -> Self {
        let capacity = config.queue_capacity;
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                queue_ready: Condvar::new(),
                drained: Condvar::new(),
                shutdown: AtomicBool::new(false),
                finished: AtomicBool::new(true),
                capacity,
                metrics_submitted: AtomicU64::new(0),
                metrics_processed: AtomicU64::new(0),
                metrics_failed: AtomicU64::new(0),
                batches_processed: AtomicU64::new(0),
                processing_time_micros: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
                store,
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Idempotent: a second call while the worker is already running is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.shared.shutdown.store(false, Ordering::Release);
        self.shared.finished.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("retro-metrics-collector".to_string())
            .spawn(move || worker_loop(&shared))
            .expect("failed to spawn metrics collector worker thread");
        *worker = Some(handle);
    }

    /// Enqueues `record`, filling in `id`/`timestamp` defaults lazily at store time. Returns the
    /// id the record will be stored under. Non-blocking unless the queue is at capacity, in which
    /// case it returns [`BackpressureError`] rather than silently dropping the record.
    pub fn submit_metric(&self, mut record: MetricRecord) -> Result<String, BackpressureError> {
        if record.id.is_none() {
            let timestamp = record.timestamp.unwrap_or_else(Utc::now);
            record.timestamp = Some(timestamp);
            record.id = Some(crate::hash::generate_metric_id(timestamp, &record.metric_type, record.model.as_deref()));
        }
        let id = record.id.clone().unwrap();

        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            return Err(BackpressureError);
        }
        queue.push_back(record);
        drop(queue);
        self.shared.metrics_submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.queue_ready.notify_one();
        Ok(id)
    }

    /// Registers a best-effort callback invoked once per record that exhausts its retries.
    pub fn register_error_callback(&self, callback: impl Fn(&MetricRecord, &str) + Send + Sync + 'static) {
        self.shared.callbacks.lock().push(Box::new(callback));
    }

    /// Signals the worker to stop. If `wait`, blocks until the queue drains or `timeout` elapses
    /// (whichever first); on timeout the remaining queue depth is logged, not lost — the worker
    /// keeps draining in the background even if this call gives up waiting.
    pub fn stop(&self, wait: bool, timeout: Option<Duration>) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.shared.queue.lock();
            self.shared.queue_ready.notify_all();
        }

        if !wait {
            return;
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.shared.queue.lock();
        loop {
            if queue.is_empty() && self.shared.finished.load(Ordering::Acquire) {
                break;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(
                            target: "retro::metrics",
                            remaining = queue.len(),
                            "metrics collector stop() timed out with records still queued"
                        );
                        return;
                    }
                    let timed_out = self.shared.drained.wait_for(&mut queue, deadline - now).timed_out();
                    if timed_out {
                        tracing::warn!(
                            target: "retro::metrics",
                            remaining = queue.len(),
                            "metrics collector stop() timed out with records still queued"
                        );
                        return;
                    }
                }
                None => {
                    self.shared.drained.wait(&mut queue);
                }
            }
        }
        drop(queue);

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
    }

    /// Snapshot of the collector's lifetime activity.
    pub fn get_stats(&self) -> CollectorStats {
        let processed = self.shared.metrics_processed.load(Ordering::Relaxed);
        let failed = self.shared.metrics_failed.load(Ordering::Relaxed);
        let batches = self.shared.batches_processed.load(Ordering::Relaxed);
        let total_micros = self.shared.processing_time_micros.load(Ordering::Relaxed);
        let denom = processed + failed;
        CollectorStats {
            metrics_submitted: self.shared.metrics_submitted.load(Ordering::Relaxed),
            metrics_processed: processed,
            metrics_failed: failed,
            batches_processed: batches,
            processing_time: Duration::from_micros(total_micros),
            queue_size: self.shared.queue.lock().len(),
            success_rate: if denom == 0 { 0.0 } else { processed as f64 / denom as f64 },
            avg_batch_time: if batches == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total_micros / batches)
            },
        }
    }
}

impl Drop for AsyncMetricsCollector {
    fn drop(&mut self) {
        self.stop(false, None);
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let batch: Vec<MetricRecord> = {
            let mut queue = shared.queue.lock();
            loop {
                if !queue.is_empty() {
                    let take = queue.len().min(shared.config.batch_size);
                    break queue.drain(..take).collect();
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break Vec::new();
                }
                let timeout = Duration::from_secs_f64(shared.config.flush_interval_sec.max(0.01));
                let _ = shared.queue_ready.wait_for(&mut queue, timeout);
            }
        };

        if batch.is_empty() {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            continue;
        }

        let batch_start = Instant::now();
        for record in batch {
            process_one(shared, record);
        }
        shared.batches_processed.fetch_add(1, Ordering::Relaxed);
        shared
            .processing_time_micros
            .fetch_add(batch_start.elapsed().as_micros() as u64, Ordering::Relaxed);

        let queue_empty = shared.queue.lock().is_empty();
        if queue_empty {
            let _queue = shared.queue.lock();
            shared.drained.notify_all();
        }
    }

    shared.finished.store(true, Ordering::Release);
    let _queue = shared.queue.lock();
    shared.drained.notify_all();
}

fn process_one(shared: &Shared, record: MetricRecord) {
    let mut attempt = 0u32;
    loop {
        let store = Arc::clone(&shared.store);
        let record_for_attempt = record.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            store.store_metric(record_for_attempt)
        }));
        match outcome {
            Ok(Ok(_id)) => {
                shared.metrics_processed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(Err(e)) => {
                attempt += 1;
                if attempt > shared.config.max_retries as u32 {
                    fail(shared, &record, &e.to_string());
                    return;
                }
            }
            Err(panic) => {
                attempt += 1;
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "metrics store panicked".to_string());
                if attempt > shared.config.max_retries as u32 {
                    fail(shared, &record, &message);
                    return;
                }
            }
        }
        std::thread::sleep(Duration::from_secs_f64(shared.config.retry_delay_sec));
    }
}

fn fail(shared: &Shared, record: &MetricRecord, reason: &str) {
    shared.metrics_failed.fetch_add(1, Ordering::Relaxed);
    for callback in shared.callbacks.lock().iter() {
        callback(record, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetricsStoreConfig;
    use parking_lot::Mutex as PLMutex;
    use tempfile::tempdir;

    fn collector_in(tmp: &std::path::Path, config: MetricsCollectorConfig) -> AsyncMetricsCollector {
        let store = Arc::new(
            MetricsStore::open(MetricsStoreConfig {
                storage_root: tmp.to_path_buf(),
                ..MetricsStoreConfig::default()
            })
            .unwrap(),
        );
        AsyncMetricsCollector::new(store, config)
    }

    fn fast_config() -> MetricsCollectorConfig {
        MetricsCollectorConfig {
            batch_size: 10,
            flush_interval_sec: 0.02,
            max_retries: 2,
            retry_delay_sec: 0.01,
            queue_capacity: 100,
        }
    }

    #[test]
    fn submit_then_stop_wait_processes_all() {
        let dir = tempdir().unwrap();
        let collector = collector_in(dir.path(), fast_config());
        collector.start();
        for _ in 0..20 {
            collector.submit_metric(MetricRecord::new("batch")).unwrap();
        }
        collector.stop(true, Some(Duration::from_secs(5)));
        let stats = collector.get_stats();
        assert_eq!(stats.metrics_submitted, 20);
        assert_eq!(stats.metrics_processed, 20);
        assert_eq!(stats.metrics_failed, 0);
        assert_eq!(stats.queue_size, 0);
    }

    #[test]
    fn backpressure_rejects_when_queue_full() {
        let dir = tempdir().unwrap();
        let config = MetricsCollectorConfig {
            queue_capacity: 1,
            ..fast_config()
        };
        let collector = collector_in(dir.path(), config);
        // do not start the worker, so the queue never drains
        collector.submit_metric(MetricRecord::new("a")).unwrap();
        let err = collector.submit_metric(MetricRecord::new("b"));
        assert!(err.is_err());
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempdir().unwrap();
        let collector = collector_in(dir.path(), fast_config());
        collector.start();
        collector.start();
        collector.submit_metric(MetricRecord::new("a")).unwrap();
        collector.stop(true, Some(Duration::from_secs(5)));
        assert_eq!(collector.get_stats().metrics_processed, 1);
    }

    #[test]
    fn error_callback_fires_after_retries_exhausted() {
        let dir = tempdir().unwrap();
        // Pre-occupy the shard directory this id would need, so every write attempt fails.
        std::fs::write(dir.path().join("xx"), b"occupied").unwrap();

        let store = Arc::new(
            MetricsStore::open(MetricsStoreConfig {
                storage_root: dir.path().to_path_buf(),
                ..MetricsStoreConfig::default()
            })
            .unwrap(),
        );
        let collector = AsyncMetricsCollector::new(
            store,
            MetricsCollectorConfig {
                batch_size: 1,
                flush_interval_sec: 0.02,
                max_retries: 1,
                retry_delay_sec: 0.01,
                queue_capacity: 10,
            },
        );
        let called = Arc::new(PLMutex::new(false));
        let called_clone = Arc::clone(&called);
        collector.register_error_callback(move |_record, _reason| {
            *called_clone.lock() = true;
        });
        collector.start();
        let mut record = MetricRecord::new("a");
        record.id = Some("xx-forced-collision".to_string());
        collector.submit_metric(record).unwrap();
        collector.stop(true, Some(Duration::from_secs(5)));

        assert!(*called.lock());
        assert_eq!(collector.get_stats().metrics_failed, 1);
    }

    #[test]
    fn stop_without_start_does_not_hang() {
        let dir = tempdir().unwrap();
        let collector = collector_in(dir.path(), fast_config());
        collector.stop(true, Some(Duration::from_millis(200)));
    }
}
