//! C1 — Bayesian trust tracker.
//!
//! Maintains a Beta(α,β) posterior per rule key, with a pure-optimisation cache over the posterior
//! mean, a bounded append-only history, time-decay, and JSON export/import. Grounded on
//! `optimized_trust_tracker.py` for the formulas and on the teacher's atomics-with-documented-
//! rationale style (`engine/src/coordinator.rs`) for the optional performance counters.

use retro_core::{push_bounded, Result, RetroError, RuleKey, TrustHistoryPoint, DEFAULT_MAX_HISTORY};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const PRIOR_ALPHA: f64 = 1.0;
const PRIOR_BETA: f64 = 1.0;

#[derive(Debug, Clone)]
struct RuleState {
    alpha: f64,
    beta: f64,
    /// `None` means the cache has been invalidated and must be recomputed on next read.
    cached_mean: Option<f64>,
    history: Vec<TrustHistoryPoint>,
    last_update: Option<DateTime<Utc>>,
}

impl Default for RuleState {
    fn default() -> Self {
        Self {
            alpha: PRIOR_ALPHA,
            beta: PRIOR_BETA,
            cached_mean: None,
            history: Vec::new(),
            last_update: None,
        }
    }
}

impl RuleState {
    fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

/// Performance-diagnostics counters, gated behind `enable_performance_stats` so they cost nothing
/// when unused. Supplement from the original's optional instrumentation block.
#[derive(Default)]
struct PerfCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    single_updates: AtomicU64,
    batch_updates: AtomicU64,
    batch_operations: AtomicU64,
}

/// Snapshot of [`PerfCounters`] returned by `get_performance_stats`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerformanceStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub single_updates: u64,
    pub batch_updates: u64,
    pub batch_operations: u64,
    pub cache_hit_ratio: f64,
}

/// Thread-safe Beta(α,β) trust tracker, one instance per owning process/worker (never a singleton —
/// see the design notes on process-wide singletons).
pub struct TrustTracker {
    state: RwLock<HashMap<RuleKey, RuleState>>,
    max_history: usize,
    perf_enabled: AtomicBool,
    perf: PerfCounters,
}

impl Default for TrustTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustTracker {
    /// Construct a tracker with the default history cap (`H_max = 100`).
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Construct a tracker with a custom history cap.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            max_history,
            perf_enabled: AtomicBool::new(false),
            perf: PerfCounters::default(),
        }
    }

    /// Applies `weight` to α (on success) or β (on failure), appends a history point, and
    /// invalidates the cache for `key`. Single-critical-section equivalent of `batch_update` with
    /// one event.
    pub fn update(&self, key: &str, succeeded: bool, weight: f64) {
        let now = Utc::now();
        let mut state = self.state.write();
        apply_one(state.entry(key.to_string()).or_default(), succeeded, weight, now, self.max_history);
        drop(state);
        if self.perf_enabled.load(Ordering::Relaxed) {
            self.perf.single_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Applies every update under a single critical section. Order within the batch does not
    /// affect the resulting `(α,β)` (addition commutes), but history entries are appended in input
    /// order and share one `now` timestamp for the whole batch.
    pub fn batch_update(&self, updates: &[(RuleKey, bool, f64)]) {
        if updates.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut state = self.state.write();
        for (key, succeeded, weight) in updates {
            apply_one(state.entry(key.clone()).or_default(), *succeeded, *weight, now, self.max_history);
        }
        drop(state);
        if self.perf_enabled.load(Ordering::Relaxed) {
            self.perf.batch_updates.fetch_add(updates.len() as u64, Ordering::Relaxed);
            self.perf.batch_operations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the posterior mean for `key`, serving from cache when valid. The cache is a pure
    /// optimisation: whether a read hits or misses it, the returned value is always "the current
    /// μ" (see the resolved open question on cache semantics).
    pub fn get_trust(&self, key: &str) -> f64 {
        {
            let state = self.state.read();
            if let Some(rule) = state.get(key) {
                if let Some(mean) = rule.cached_mean {
                    self.record_cache(true);
                    return mean;
                }
            } else {
                self.record_cache(false);
                return PRIOR_ALPHA / (PRIOR_ALPHA + PRIOR_BETA);
            }
        }
        self.record_cache(false);
        let mut state = self.state.write();
        let rule = state.entry(key.to_string()).or_default();
        let mean = rule.mean();
        rule.cached_mean = Some(mean);
        mean
    }

    fn record_cache(&self, hit: bool) {
        if !self.perf_enabled.load(Ordering::Relaxed) {
            return;
        }
        if hit {
            self.perf.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.perf.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Vectorised [`Self::get_trust`] under one critical section.
    pub fn get_trust_batch(&self, keys: &[RuleKey]) -> HashMap<RuleKey, f64> {
        keys.iter().map(|k| (k.clone(), self.get_trust(k))).collect()
    }

    /// Raw `(α, β)` for `key`, defaulting to the prior `(1.0, 1.0)`.
    pub fn get_stats(&self, key: &str) -> (f64, f64) {
        let state = self.state.read();
        state.get(key).map(|r| (r.alpha, r.beta)).unwrap_or((PRIOR_ALPHA, PRIOR_BETA))
    }

    /// `⌊α + β − 2⌋`, distinct from the `n = α+β` used internally by the confidence-interval
    /// standard-error formula.
    pub fn get_sample_size(&self, key: &str) -> i64 {
        let (alpha, beta) = self.get_stats(key);
        (alpha + beta - 2.0).floor() as i64
    }

    /// Clipped confidence interval `[μ − z·se, μ + z·se]`, with `se = √(μ(1−μ)/(α+β))`.
    pub fn get_confidence_interval(&self, key: &str, z: f64) -> (f64, f64) {
        let (alpha, beta) = self.get_stats(key);
        let n = alpha + beta;
        let mean = alpha / n;
        let se = (mean * (1.0 - mean) / n).sqrt();
        ((mean - z * se).max(0.0), (mean + z * se).min(1.0))
    }

    /// Vectorised [`Self::get_confidence_interval`] under one critical section.
    pub fn get_confidence_interval_batch(&self, keys: &[RuleKey], z: f64) -> HashMap<RuleKey, (f64, f64)> {
        let state = self.state.read();
        keys.iter()
            .map(|k| {
                let (alpha, beta) = state.get(k).map(|r| (r.alpha, r.beta)).unwrap_or((PRIOR_ALPHA, PRIOR_BETA));
                let n = alpha + beta;
                let mean = alpha / n;
                let se = (mean * (1.0 - mean) / n).sqrt();
                (k.clone(), ((mean - z * se).max(0.0), (mean + z * se).min(1.0)))
            })
            .collect()
    }

    /// Logistic of `0.1·(n−10)` where `n = α+β−2`.
    pub fn get_confidence_strength(&self, key: &str) -> f64 {
        let n = self.get_sample_size(key) as f64;
        logistic(0.1 * (n - 10.0))
    }

    /// Elapsed time since the last update to `key`, or `None` if it was never updated.
    pub fn get_time_since_update(&self, key: &str) -> Option<Duration> {
        let state = self.state.read();
        let last = state.get(key)?.last_update?;
        let elapsed = Utc::now().signed_duration_since(last);
        Some(Duration::from_millis(elapsed.num_milliseconds().max(0) as u64))
    }

    /// If `α+β > min_count`, decays both toward the prior by `factor`, floored at 1.0.
    pub fn apply_decay(&self, key: &str, factor: f64, min_count: f64) {
        let mut state = self.state.write();
        if let Some(rule) = state.get_mut(key) {
            if rule.alpha + rule.beta > min_count {
                rule.alpha = (rule.alpha * factor).max(1.0);
                rule.beta = (rule.beta * factor).max(1.0);
                rule.cached_mean = None;
            }
        }
    }

    /// [`Self::apply_decay`] applied to every known key under a single critical section.
    pub fn apply_global_decay(&self, factor: f64, min_count: f64) {
        let mut state = self.state.write();
        for rule in state.values_mut() {
            if rule.alpha + rule.beta > min_count {
                rule.alpha = (rule.alpha * factor).max(1.0);
                rule.beta = (rule.beta * factor).max(1.0);
                rule.cached_mean = None;
            }
        }
    }

    /// Truncates each key's history to its most recent `max_history` entries. Does not realign
    /// the remaining history length with the total update count recorded in `(α,β)` — downstream
    /// consumers must tolerate a history shorter than the true update count (design note §9).
    pub fn purge_old_timestamps(&self, max_history: usize) {
        let mut state = self.state.write();
        for rule in state.values_mut() {
            if rule.history.len() > max_history {
                let overflow = rule.history.len() - max_history;
                rule.history.drain(0..overflow);
            }
        }
    }

    /// Enable or disable the optional diagnostics counters.
    pub fn enable_performance_stats(&self, enabled: bool) {
        self.perf_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot of the diagnostics counters (all zero if never enabled).
    pub fn get_performance_stats(&self) -> PerformanceStats {
        let hits = self.perf.cache_hits.load(Ordering::Relaxed);
        let misses = self.perf.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PerformanceStats {
            cache_hits: hits,
            cache_misses: misses,
            single_updates: self.perf.single_updates.load(Ordering::Relaxed),
            batch_updates: self.perf.batch_updates.load(Ordering::Relaxed),
            batch_operations: self.perf.batch_operations.load(Ordering::Relaxed),
            cache_hit_ratio: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }

    /// Reset the diagnostics counters to zero without touching trust state.
    pub fn reset_performance_stats(&self) {
        self.perf.cache_hits.store(0, Ordering::Relaxed);
        self.perf.cache_misses.store(0, Ordering::Relaxed);
        self.perf.single_updates.store(0, Ordering::Relaxed);
        self.perf.batch_updates.store(0, Ordering::Relaxed);
        self.perf.batch_operations.store(0, Ordering::Relaxed);
    }

    /// Writes `{stats, last_update, timestamps, export_time}` to `path` using a
    /// write-to-temp-then-atomic-rename discipline. Never raises; returns `Ok(())` on success.
    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let state = self.state.read();
        let mut stats = HashMap::new();
        let mut last_update = HashMap::new();
        let mut timestamps = HashMap::new();
        for (key, rule) in state.iter() {
            stats.insert(key.clone(), [rule.alpha, rule.beta]);
            if let Some(t) = rule.last_update {
                last_update.insert(key.clone(), t.timestamp());
            }
            timestamps.insert(
                key.clone(),
                TimestampSeries {
                    times: rule.history.iter().map(|p| p.timestamp.timestamp()).collect(),
                    values: rule.history.iter().map(|p| p.mean).collect(),
                },
            );
        }
        let doc = ExportDoc {
            stats,
            last_update,
            timestamps,
            export_time: Utc::now().timestamp(),
        };
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(&doc)?;
        {
            let mut f = fs::File::create(&tmp_path).map_err(RetroError::from)?;
            f.write_all(&bytes).map_err(RetroError::from)?;
            f.sync_all().map_err(RetroError::from)?;
        }
        fs::rename(&tmp_path, path).map_err(RetroError::from)?;
        Ok(())
    }

    /// Replaces all in-memory state from `path`. Never raises; returns `false` and leaves prior
    /// state untouched on any failure (missing file, malformed JSON). Accepts both the current
    /// `timestamps[K] = {times, values}` layout and the legacy `timestamps[K] = [[t, μ], ...]`
    /// layout.
    pub fn import_from_file(&self, path: &Path) -> bool {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(target: "retro::trust", error = %e, "import_from_file: read failed");
                return false;
            }
        };
        let raw: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "retro::trust", error = %e, "import_from_file: parse failed");
                return false;
            }
        };
        let mut new_state: HashMap<RuleKey, RuleState> = HashMap::new();

        if let Some(stats) = raw.get("stats").and_then(|v| v.as_object()) {
            for (key, pair) in stats {
                if let Some(arr) = pair.as_array() {
                    if arr.len() == 2 {
                        let alpha = arr[0].as_f64().unwrap_or(PRIOR_ALPHA);
                        let beta = arr[1].as_f64().unwrap_or(PRIOR_BETA);
                        new_state.entry(key.clone()).or_default().alpha = alpha;
                        new_state.entry(key.clone()).or_default().beta = beta;
                    }
                }
            }
        }
        if let Some(last) = raw.get("last_update").and_then(|v| v.as_object()) {
            for (key, ts) in last {
                if let Some(secs) = ts.as_i64() {
                    if let Some(dt) = DateTime::<Utc>::from_timestamp(secs, 0) {
                        new_state.entry(key.clone()).or_default().last_update = Some(dt);
                    }
                }
            }
        }
        if let Some(timestamps) = raw.get("timestamps").and_then(|v| v.as_object()) {
            for (key, series) in timestamps {
                let rule = new_state.entry(key.clone()).or_default();
                rule.history = parse_timestamp_series(series);
            }
        }

        let mut state = self.state.write();
        *state = new_state;
        true
    }
}

fn apply_one(rule: &mut RuleState, succeeded: bool, weight: f64, now: DateTime<Utc>, max_history: usize) {
    if succeeded {
        rule.alpha += weight;
    } else {
        rule.beta += weight;
    }
    rule.cached_mean = None;
    rule.last_update = Some(now);
    let mean = rule.mean();
    push_bounded(&mut rule.history, TrustHistoryPoint { timestamp: now, mean }, max_history);
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Serialize, Deserialize)]
struct TimestampSeries {
    times: Vec<i64>,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct ExportDoc {
    stats: HashMap<RuleKey, [f64; 2]>,
    last_update: HashMap<RuleKey, i64>,
    timestamps: HashMap<RuleKey, TimestampSeries>,
    export_time: i64,
}

/// Parses either `{times: [...], values: [...]}` or the legacy `[[t, μ], ...]` layout.
fn parse_timestamp_series(value: &serde_json::Value) -> Vec<TrustHistoryPoint> {
    if let Some(obj) = value.as_object() {
        let times = obj.get("times").and_then(|v| v.as_array());
        let values = obj.get("values").and_then(|v| v.as_array());
        if let (Some(times), Some(values)) = (times, values) {
            return times
                .iter()
                .zip(values.iter())
                .filter_map(|(t, v)| {
                    let secs = t.as_i64()?;
                    let mean = v.as_f64()?;
                    let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)?;
                    Some(TrustHistoryPoint { timestamp, mean })
                })
                .collect();
        }
    }
    if let Some(arr) = value.as_array() {
        return arr
            .iter()
            .filter_map(|pair| {
                let pair = pair.as_array()?;
                let secs = pair.first()?.as_i64()?;
                let mean = pair.get(1)?.as_f64()?;
                let timestamp = DateTime::<Utc>::from_timestamp(secs, 0)?;
                Some(TrustHistoryPoint { timestamp, mean })
            })
            .collect();
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_rule_starts_at_prior_mean() {
        let tracker = TrustTracker::new();
        assert_eq!(tracker.get_trust("r1"), 0.5);
    }

    #[test]
    fn update_moves_mean_toward_success() {
        let tracker = TrustTracker::new();
        for _ in 0..10 {
            tracker.update("r1", true, 1.0);
        }
        assert!(tracker.get_trust("r1") > 0.5);
        let (alpha, beta) = tracker.get_stats("r1");
        assert!(alpha >= 1.0 && beta >= 1.0);
    }

    #[test]
    fn batch_update_is_commutative_with_single_updates() {
        let sequential = TrustTracker::new();
        sequential.update("r1", true, 2.0);
        sequential.update("r1", false, 1.0);
        sequential.update("r1", true, 3.0);

        let batched = TrustTracker::new();
        batched.batch_update(&[
            ("r1".to_string(), true, 2.0),
            ("r1".to_string(), false, 1.0),
            ("r1".to_string(), true, 3.0),
        ]);

        assert_eq!(sequential.get_stats("r1"), batched.get_stats("r1"));
    }

    #[test]
    fn alpha_beta_never_below_one() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 0.0001);
        let (alpha, beta) = tracker.get_stats("r1");
        assert!(alpha >= 1.0);
        assert!(beta >= 1.0);
    }

    #[test]
    fn confidence_interval_is_clipped_to_unit_range() {
        let tracker = TrustTracker::new();
        for _ in 0..50 {
            tracker.update("r1", true, 1.0);
        }
        let (lo, hi) = tracker.get_confidence_interval("r1", 1.96);
        assert!((0.0..=1.0).contains(&lo));
        assert!((0.0..=1.0).contains(&hi));
        assert!(lo <= hi);
    }

    #[test]
    fn confidence_interval_batch_matches_single() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 5.0);
        tracker.update("r2", false, 3.0);
        let batch = tracker.get_confidence_interval_batch(&["r1".to_string(), "r2".to_string()], 1.96);
        assert_eq!(batch["r1"], tracker.get_confidence_interval("r1", 1.96));
        assert_eq!(batch["r2"], tracker.get_confidence_interval("r2", 1.96));
    }

    #[test]
    fn sample_size_uses_alpha_plus_beta_minus_two() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 8.0); // alpha: 1+8=9, beta: 1 -> n = 9+1-2 = 8
        assert_eq!(tracker.get_sample_size("r1"), 8);
    }

    #[test]
    fn apply_decay_never_drops_below_one_and_never_increases_mass() {
        let tracker = TrustTracker::new();
        for _ in 0..20 {
            tracker.update("r1", true, 1.0);
        }
        let (alpha_before, beta_before) = tracker.get_stats("r1");
        tracker.apply_decay("r1", 0.5, 5.0);
        let (alpha_after, beta_after) = tracker.get_stats("r1");
        assert!(alpha_after >= 1.0);
        assert!(beta_after >= 1.0);
        assert!(alpha_after + beta_after <= alpha_before + beta_before);
    }

    #[test]
    fn apply_decay_noop_below_min_count() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 1.0);
        let before = tracker.get_stats("r1");
        tracker.apply_decay("r1", 0.1, 1000.0);
        assert_eq!(tracker.get_stats("r1"), before);
    }

    #[test]
    fn history_is_capped_at_max_history() {
        let tracker = TrustTracker::with_max_history(5);
        for _ in 0..20 {
            tracker.update("r1", true, 1.0);
        }
        tracker.purge_old_timestamps(5);
        // internal cap already keeps it <= 5; purge is idempotent here.
        let path = tempdir().unwrap().path().join("export.json");
        tracker.export_to_file(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let times = doc["timestamps"]["r1"]["times"].as_array().unwrap();
        assert!(times.len() <= 5);
    }

    #[test]
    fn export_then_import_round_trips() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 3.0);
        tracker.update("r2", false, 2.0);
        let dir = tempdir().unwrap();
        let path = dir.path().join("trust.json");
        tracker.export_to_file(&path).unwrap();

        let restored = TrustTracker::new();
        assert!(restored.import_from_file(&path));
        assert_eq!(restored.get_stats("r1"), tracker.get_stats("r1"));
        assert_eq!(restored.get_stats("r2"), tracker.get_stats("r2"));
    }

    #[test]
    fn import_accepts_legacy_pair_list_timestamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let legacy = serde_json::json!({
            "stats": {"r1": [3.0, 1.0]},
            "last_update": {"r1": 1_700_000_000i64},
            "timestamps": {"r1": [[1_700_000_000i64, 0.75]]},
            "export_time": 1_700_000_001i64,
        });
        fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let tracker = TrustTracker::new();
        assert!(tracker.import_from_file(&path));
        assert_eq!(tracker.get_stats("r1"), (3.0, 1.0));
    }

    #[test]
    fn import_missing_file_returns_false_and_preserves_state() {
        let tracker = TrustTracker::new();
        tracker.update("r1", true, 5.0);
        let before = tracker.get_stats("r1");
        assert!(!tracker.import_from_file(Path::new("/nonexistent/path/x.json")));
        assert_eq!(tracker.get_stats("r1"), before);
    }

    #[test]
    fn performance_stats_are_zero_until_enabled() {
        let tracker = TrustTracker::new();
        tracker.get_trust("r1");
        let stats = tracker.get_performance_stats();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 0);
    }

    #[test]
    fn performance_stats_track_cache_hits_and_misses() {
        let tracker = TrustTracker::new();
        tracker.enable_performance_stats(true);
        tracker.update("r1", true, 1.0); // invalidates cache
        tracker.get_trust("r1"); // miss, populates cache
        tracker.get_trust("r1"); // hit
        let stats = tracker.get_performance_stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.cache_hit_ratio - 0.5).abs() < 1e-9);
        tracker.reset_performance_stats();
        assert_eq!(tracker.get_performance_stats().cache_hits, 0);
    }

    #[test]
    fn time_since_update_is_none_for_unknown_key() {
        let tracker = TrustTracker::new();
        assert!(tracker.get_time_since_update("never-seen").is_none());
    }
}
