//! C7 — parallel coordinator: owns the outer concurrent workflow of a training run.
//!
//! Grounded on `crates/engine/src/coordinator.rs` for the atomics-with-documented-rationale style
//! (metrics counters use `Relaxed` — they are observational and synchronise nothing else) and on
//! `crates/engine/src/background.rs` for the worker-pool shape, generalised here from a priority
//! task queue to a flat batch-index work queue since C7 has no priority concept. The distributed
//! runtime the original brings up via Dask is realised as this in-process pool, per design note
//! §9 and SPEC_FULL.md §4.6.

use crate::batch::{prepare_training_batches as plan_batches, TrainingBatch};
use retro_core::{DataStoreConfig, MetricsCollectorConfig, RetroError, Result, RuleKey, TrustBufferConfig};
use retro_metrics::MetricsStore;
use retro_trust::TrustTracker;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for [`ParallelCoordinator`], plus the three sub-component configs each worker
/// uses to re-hydrate its own C5/C2/C4 instances.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_workers: usize,
    pub threads_per_worker: usize,
    pub dashboard_port: Option<u16>,
    /// Whether the worker-pool runtime should be reported as active. When `false`, training still
    /// runs (in-process, on `max_workers` threads) but the results summary's `worker_pool` field
    /// reports `{"status": "Not used"}`, mirroring the original's "Dask disabled" fallback.
    pub pool_enabled: bool,
    /// An externally-owned cancellation flag (e.g. set by a SIGINT/SIGTERM handler at the binary
    /// entrypoint). Polled alongside `is_training` so a signal can stop the run cooperatively
    /// without the coordinator needing to know anything about process signals itself.
    pub external_cancel: Option<Arc<AtomicBool>>,
    pub trust_buffer: TrustBufferConfig,
    pub metrics_collector: MetricsCollectorConfig,
    pub data_store: DataStoreConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            threads_per_worker: 1,
            dashboard_port: None,
            pool_enabled: true,
            external_cancel: None,
            trust_buffer: TrustBufferConfig::default(),
            metrics_collector: MetricsCollectorConfig::default(),
            data_store: DataStoreConfig::default(),
        }
    }
}

/// Observable shape of the worker-pool runtime, reported in the results summary. Keeps the
/// original's `dask_cluster_info` shape under a new name (§4.6).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WorkerPoolInfo {
    Active { address_or_id: String, dashboard_link: Option<String>, n_workers: usize, threads: usize },
    NotUsed { status: &'static str },
}

/// A snapshot passed to the progress callback roughly every two seconds while training is active.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default, Clone, Serialize)]
struct PerformanceMetrics {
    total_batches: usize,
    total_variables: usize,
    completed_batches: usize,
    failed_batches: usize,
    duration_seconds: f64,
    avg_batch_time_seconds: f64,
    estimated_sequential_time_seconds: f64,
    speedup_factor: f64,
}

/// Summary returned by `get_results_summary()`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSummary {
    pub batches: BatchesSummary,
    pub variables: VariablesSummary,
    pub performance: PerformanceSummary,
    pub worker_pool: WorkerPoolInfo,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchesSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariablesSummary {
    pub total: usize,
    pub trust_scores: HashMap<RuleKey, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub duration_seconds: f64,
    pub speedup_factor: f64,
    pub estimated_sequential_time_seconds: f64,
}

/// Owns the shared C1/C3 instances and orchestrates a training run's batch-level parallelism.
pub struct ParallelCoordinator {
    config: CoordinatorConfig,
    tracker: Arc<TrustTracker>,
    metrics_store: Arc<MetricsStore>,
    batches: RwLock<Vec<TrainingBatch>>,
    is_training: AtomicBool,
    completed_batches: AtomicUsize,
    failed_batches: AtomicUsize,
    errors: Mutex<Vec<String>>,
    performance: RwLock<PerformanceMetrics>,
    training_start_time: RwLock<Option<DateTime<Utc>>>,
    training_end_time: RwLock<Option<DateTime<Utc>>>,
    worker_pool_info: RwLock<WorkerPoolInfo>,
}

impl ParallelCoordinator {
    pub fn new(config: CoordinatorConfig, tracker: Arc<TrustTracker>, metrics_store: Arc<MetricsStore>) -> Self {
        Self {
            config,
            tracker,
            metrics_store,
            batches: RwLock::new(Vec::new()),
            is_training: AtomicBool::new(false),
            completed_batches: AtomicUsize::new(0),
            failed_batches: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
            performance: RwLock::new(PerformanceMetrics::default()),
            training_start_time: RwLock::new(None),
            training_end_time: RwLock::new(None),
            worker_pool_info: RwLock::new(WorkerPoolInfo::NotUsed { status: "Not used" }),
        }
    }

    /// C6 — plans the batches for this run and records `total_batches`/`total_variables`.
    pub fn prepare_training_batches(
        &self,
        variables: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        batch_days: i64,
        overlap_days: i64,
        batch_limit: Option<usize>,
    ) -> Result<()> {
        let batches = plan_batches(variables, start, end, batch_days, overlap_days, batch_limit)?;
        let mut perf = self.performance.write();
        perf.total_batches = batches.len();
        perf.total_variables = variables.len();
        drop(perf);
        *self.batches.write() = batches;
        Ok(())
    }

    /// C7 execution: dispatches every planned batch across `max_workers` OS threads, reporting
    /// progress roughly every two seconds, and returns the aggregated summary.
    pub fn start_training(
        &self,
        progress_callback: Option<Box<dyn Fn(ProgressSnapshot) + Send + Sync>>,
    ) -> Result<ResultsSummary> {
        if self.is_training.swap(true, Ordering::AcqRel) {
            return Err(RetroError::invalid_input("training is already in progress"));
        }

        let total = self.batches.read().len();
        if total == 0 {
            self.is_training.store(false, Ordering::Release);
            return Err(RetroError::invalid_input("no batches to train on; call prepare_training_batches first"));
        }

        self.completed_batches.store(0, Ordering::Relaxed);
        self.failed_batches.store(0, Ordering::Relaxed);
        self.errors.lock().clear();
        *self.training_start_time.write() = Some(Utc::now());

        *self.worker_pool_info.write() = if self.config.pool_enabled {
            WorkerPoolInfo::Active {
                address_or_id: "in-process".to_string(),
                dashboard_link: self.config.dashboard_port.map(|p| format!("http://localhost:{p}")),
                n_workers: self.config.max_workers,
                threads: self.config.threads_per_worker,
            }
        } else {
            WorkerPoolInfo::NotUsed { status: "Not used" }
        };

        let run_start = Instant::now();
        let next_index = Arc::new(AtomicUsize::new(0));
        let batches_lock = Arc::new(Mutex::new(std::mem::take(&mut *self.batches.write())));
        let total_processing_micros = Arc::new(std::sync::atomic::AtomicU64::new(0));

        std::thread::scope(|scope| {
            for worker_id in 0..self.config.max_workers.max(1) {
                let next_index = Arc::clone(&next_index);
                let batches_lock = Arc::clone(&batches_lock);
                let total_processing_micros = Arc::clone(&total_processing_micros);
                let tracker = Arc::clone(&self.tracker);
                let metrics_store = Arc::clone(&self.metrics_store);
                let config = self.config.clone();
                scope.spawn(move || {
                    loop {
                        if !self.is_training.load(Ordering::Acquire) {
                            break;
                        }
                        let idx = next_index.fetch_add(1, Ordering::AcqRel);
                        if idx >= total {
                            break;
                        }
                        let batch_snapshot = batches_lock.lock()[idx].clone();
                        let task_start = Instant::now();
                        let outcome = crate::worker::run_batch_task(
                            &batch_snapshot,
                            config.data_store.clone(),
                            config.trust_buffer.clone(),
                            config.metrics_collector.clone(),
                            Arc::clone(&tracker),
                            Arc::clone(&metrics_store),
                        );
                        let elapsed = task_start.elapsed();
                        total_processing_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

                        let mut batches = batches_lock.lock();
                        match outcome {
                            Ok(metrics) => {
                                batches[idx].processing_time = Some(elapsed);
                                batches[idx].metrics = Some(metrics);
                                self.completed_batches.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                batches[idx].error = Some(e.to_string());
                                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                                self.errors.lock().push(e.to_string());
                            }
                        }
                        drop(batches);
                        tracing::debug!(target: "retro::coordinator", worker_id, batch = idx, "batch task finished");
                    }
                });
            }

            if progress_callback.is_some() || self.config.external_cancel.is_some() {
                loop {
                    let completed = self.completed_batches.load(Ordering::Relaxed);
                    let failed = self.failed_batches.load(Ordering::Relaxed);
                    if let Some(callback) = &progress_callback {
                        callback(ProgressSnapshot {
                            total_batches: total,
                            completed_batches: completed,
                            failed_batches: failed,
                            elapsed: run_start.elapsed(),
                        });
                    }
                    if completed + failed >= total || !self.is_training.load(Ordering::Acquire) {
                        break;
                    }
                    if let Some(flag) = &self.config.external_cancel {
                        if flag.load(Ordering::Relaxed) {
                            tracing::warn!(target: "retro::coordinator", "external cancellation requested, stopping");
                            self.is_training.store(false, Ordering::Release);
                            break;
                        }
                    }
                    std::thread::sleep(Duration::from_secs(2));
                }
            }
        });

        *self.batches.write() = Arc::try_unwrap(batches_lock).map(Mutex::into_inner).unwrap_or_default();
        self.is_training.store(false, Ordering::Release);
        *self.training_end_time.write() = Some(Utc::now());

        let processing_seconds = run_start.elapsed().as_secs_f64();
        let completed = self.completed_batches.load(Ordering::Relaxed);
        let avg_batch_time = if completed > 0 {
            (total_processing_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0) / completed as f64
        } else {
            0.0
        };
        let estimated_sequential_time = avg_batch_time * total as f64;
        let speedup_factor = if processing_seconds > 0.0 { estimated_sequential_time / processing_seconds } else { 0.0 };

        {
            let mut perf = self.performance.write();
            perf.completed_batches = completed;
            perf.failed_batches = self.failed_batches.load(Ordering::Relaxed);
            perf.duration_seconds = processing_seconds;
            perf.avg_batch_time_seconds = avg_batch_time;
            perf.estimated_sequential_time_seconds = estimated_sequential_time;
            perf.speedup_factor = speedup_factor;
        }

        Ok(self.get_results_summary())
    }

    /// Idempotent cooperative cancellation: clears `is_training` so worker threads stop claiming
    /// new batches (already-dispatched batches run to completion) and the progress loop exits.
    pub fn stop_training(&self) {
        self.is_training.store(false, Ordering::Release);
        *self.training_end_time.write() = Some(Utc::now());
    }

    pub fn is_training(&self) -> bool {
        self.is_training.load(Ordering::Acquire)
    }

    /// Aggregates the current run state into the reportable summary shape.
    pub fn get_results_summary(&self) -> ResultsSummary {
        let batches = self.batches.read();
        let total = batches.len();
        let completed = self.completed_batches.load(Ordering::Relaxed);
        let failed = self.failed_batches.load(Ordering::Relaxed);
        let all_variables: Vec<RuleKey> = batches.iter().flat_map(|b| b.variables.clone()).collect::<std::collections::HashSet<_>>().into_iter().collect();
        drop(batches);

        let perf = self.performance.read().clone();
        let trust_scores = self.tracker.get_trust_batch(&all_variables);

        let mut errors = self.errors.lock().clone();
        errors.truncate(10);

        ResultsSummary {
            batches: BatchesSummary {
                total,
                completed,
                failed,
                success_rate: if total > 0 { completed as f64 / total as f64 } else { 0.0 },
            },
            variables: VariablesSummary { total: perf.total_variables, trust_scores },
            performance: PerformanceSummary {
                duration_seconds: perf.duration_seconds,
                speedup_factor: perf.speedup_factor,
                estimated_sequential_time_seconds: perf.estimated_sequential_time_seconds,
            },
            worker_pool: self.worker_pool_info.read().clone(),
            errors,
        }
    }
}
