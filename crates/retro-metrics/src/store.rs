//! C3 — metrics store: append-mostly, indexed, optionally gzip-compressed metric records.
//!
//! Layout grounded on `crates/storage/src/registry.rs`'s multi-map inverted-index idiom, adapted
//! from primitive-type routing to metric-type/model/date/tag lookups, plus on-disk persistence per
//! `examples/original_source/recursive_training/metrics/metrics_store.py`'s two-character id
//! prefix sharding.

use crate::types::{CostStatus, CostTracking, MetricQuery, MetricRecord};
use retro_core::{RetroError, Result};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Configuration for [`MetricsStore`].
#[derive(Debug, Clone)]
pub struct MetricsStoreConfig {
    pub storage_root: PathBuf,
    pub max_cache_size: usize,
    pub compression_enabled: bool,
    pub compression_level: u32,
    pub cost_warning_threshold: f64,
    pub cost_critical_threshold: f64,
    pub cost_shutdown_threshold: f64,
}

impl Default for MetricsStoreConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data/recursive_training/metrics"),
            max_cache_size: 1000,
            compression_enabled: true,
            compression_level: 6,
            cost_warning_threshold: 50.0,
            cost_critical_threshold: 100.0,
            cost_shutdown_threshold: 200.0,
        }
    }
}

#[derive(Default)]
struct Indices {
    by_type: HashMap<String, HashSet<String>>,
    by_model: HashMap<String, HashSet<String>>,
    by_date: HashMap<String, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
}

#[derive(Default, Clone, Copy)]
struct Summary {
    count: u64,
    total_cost: f64,
    api_calls: u64,
    token_usage: u64,
}

struct State {
    indices: Indices,
    summary: Summary,
    cache: HashMap<String, MetricRecord>,
    cache_order: Vec<String>,
}

/// Persisted, indexed store of [`MetricRecord`]s.
pub struct MetricsStore {
    config: MetricsStoreConfig,
    state: RwLock<State>,
}

impl MetricsStore {
    /// Opens (or creates) a store rooted at `config.storage_root`, loading existing indices.
    /// Index-file corruption yields empty indices with a logged warning rather than an error.
    pub fn open(config: MetricsStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.storage_root).map_err(RetroError::from)?;
        fs::create_dir_all(index_root(&config.storage_root)).map_err(RetroError::from)?;

        let indices = load_indices(&config.storage_root);
        let summary = load_summary(&config.storage_root);

        Ok(Self {
            config,
            state: RwLock::new(State {
                indices,
                summary,
                cache: HashMap::new(),
                cache_order: Vec::new(),
            }),
        })
    }

    /// Stores `record`, filling in `id`/`timestamp` if absent. Write failures propagate to the
    /// caller; index persistence failures are logged, not raised.
    pub fn store_metric(&self, mut record: MetricRecord) -> Result<String> {
        let timestamp = record.timestamp.unwrap_or_else(Utc::now);
        record.timestamp = Some(timestamp);
        let id = record
            .id
            .clone()
            .unwrap_or_else(|| crate::hash::generate_metric_id(timestamp, &record.metric_type, record.model.as_deref()));
        record.id = Some(id.clone());

        let bytes = serde_json::to_vec(&record)?;
        write_record_file(&self.config, &id, &bytes)?;

        let mut state = self.state.write();
        state.indices.by_type.entry(record.metric_type.clone()).or_default().insert(id.clone());
        if let Some(model) = &record.model {
            state.indices.by_model.entry(model.clone()).or_default().insert(id.clone());
        }
        let date_key = timestamp.date_naive().to_string();
        state.indices.by_date.entry(date_key).or_default().insert(id.clone());
        for tag in &record.tags {
            state.indices.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }
        state.summary.count += 1;

        insert_cache(&mut state, &id, record, self.config.max_cache_size);
        if let Err(e) = persist_indices(&self.config.storage_root, &state.indices) {
            tracing::warn!(target: "retro::metrics", error = %e, "failed to persist metrics indices");
        }
        if let Err(e) = persist_summary(&self.config.storage_root, &state.summary) {
            tracing::warn!(target: "retro::metrics", error = %e, "failed to persist metrics summary");
        }
        Ok(id)
    }

    /// Looks up a single record by id: cache, then disk, else `None`.
    pub fn get_metric(&self, id: &str) -> Option<MetricRecord> {
        {
            let state = self.state.read();
            if let Some(record) = state.cache.get(id) {
                return Some(record.clone());
            }
        }
        let record = read_record_file(&self.config, id)?;
        let mut state = self.state.write();
        insert_cache(&mut state, id, record.clone(), self.config.max_cache_size);
        Some(record)
    }

    /// Intersection of every populated filter in `query`, sorted by timestamp descending, capped
    /// at `query.limit`. No filters supplied yields the union of all known ids.
    pub fn query_metrics(&self, query: &MetricQuery) -> Vec<MetricRecord> {
        let state = self.state.read();
        let mut candidate: Option<HashSet<String>> = None;

        if let Some(types) = &query.metric_types {
            candidate = Some(intersect_with_union_of(candidate, &state.indices.by_type, types));
        }
        if let Some(models) = &query.models {
            candidate = Some(intersect_with_union_of(candidate, &state.indices.by_model, models));
        }
        if let Some(tags) = &query.tags {
            candidate = Some(intersect_with_union_of(candidate, &state.indices.by_tag, tags));
        }

        let ids: HashSet<String> = candidate.unwrap_or_else(|| {
            state.indices.by_type.values().flatten().cloned().collect()
        });
        drop(state);

        let mut records: Vec<MetricRecord> = ids.iter().filter_map(|id| self.get_metric(id)).collect();

        if let Some(start) = query.start_date {
            records.retain(|r| r.timestamp.map(|t| t >= start).unwrap_or(false));
        }
        if let Some(end) = query.end_date {
            records.retain(|r| r.timestamp.map(|t| t <= end).unwrap_or(false));
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        records
    }

    /// Increments the running cost/usage totals and classifies the new total against the three
    /// configured thresholds.
    pub fn track_cost(&self, cost: f64, api_calls: u64, token_usage: u64) -> CostTracking {
        let mut state = self.state.write();
        state.summary.total_cost += cost;
        state.summary.api_calls += api_calls;
        state.summary.token_usage += token_usage;
        let total_cost = state.summary.total_cost;
        let status = if total_cost >= self.config.cost_shutdown_threshold {
            CostStatus::Shutdown
        } else if total_cost >= self.config.cost_critical_threshold {
            CostStatus::Critical
        } else if total_cost >= self.config.cost_warning_threshold {
            CostStatus::Warning
        } else {
            CostStatus::Ok
        };
        if let Err(e) = persist_summary(&self.config.storage_root, &state.summary) {
            tracing::warn!(target: "retro::metrics", error = %e, "failed to persist cost summary");
        }
        CostTracking {
            total_cost,
            api_calls: state.summary.api_calls,
            token_usage: state.summary.token_usage,
            status,
        }
    }

    /// Linear scan over every known record, for small deployments only (no index usage).
    pub fn get_metrics_by_filter(&self, filter: &HashMap<String, serde_json::Value>, limit: Option<usize>) -> Vec<MetricRecord> {
        let all_ids: HashSet<String> = {
            let state = self.state.read();
            state.indices.by_type.values().flatten().cloned().collect()
        };
        let mut matched: Vec<MetricRecord> = all_ids
            .iter()
            .filter_map(|id| self.get_metric(id))
            .filter(|record| matches_filter(record, filter))
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        matched
    }

    /// `query_metrics` with descending time order, convenience-wrapped.
    pub fn get_recent_metrics(&self, metric_types: Option<Vec<String>>, limit: usize) -> Vec<MetricRecord> {
        self.query_metrics(&MetricQuery {
            metric_types,
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Tabular export of a query result as CSV text (no dataframe dependency in this stack).
    pub fn export_to_dataframe(&self, query: &MetricQuery) -> String {
        let records = self.query_metrics(query);
        let mut out = String::from("id,timestamp,metric_type,model,tags\n");
        for record in &records {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                record.id.clone().unwrap_or_default(),
                record.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
                csv_escape(&record.metric_type),
                record.model.as_deref().map(csv_escape).unwrap_or_default(),
                csv_escape(&record.tags.join(";")),
            ));
        }
        out
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn matches_filter(record: &MetricRecord, filter: &HashMap<String, serde_json::Value>) -> bool {
    for (key, expected) in filter {
        let actual = match key.as_str() {
            "metric_type" => serde_json::Value::String(record.metric_type.clone()),
            "model" => record.model.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null),
            _ => record.payload.get(key).cloned().unwrap_or(serde_json::Value::Null),
        };
        if &actual != expected {
            return false;
        }
    }
    true
}

fn intersect_with_union_of(
    candidate: Option<HashSet<String>>,
    index: &HashMap<String, HashSet<String>>,
    keys: &[String],
) -> HashSet<String> {
    let union: HashSet<String> = keys.iter().filter_map(|k| index.get(k)).flatten().cloned().collect();
    match candidate {
        Some(existing) => existing.intersection(&union).cloned().collect(),
        None => union,
    }
}

fn insert_cache(state: &mut State, id: &str, record: MetricRecord, max_cache_size: usize) {
    if !state.cache.contains_key(id) {
        state.cache_order.push(id.to_string());
    }
    state.cache.insert(id.to_string(), record);
    while state.cache.len() > max_cache_size && !state.cache_order.is_empty() {
        let oldest = state.cache_order.remove(0);
        state.cache.remove(&oldest);
    }
}

fn shard_dir(storage_root: &Path, id: &str) -> PathBuf {
    let prefix: String = id.chars().take(2).collect();
    storage_root.join(if prefix.is_empty() { "_".to_string() } else { prefix })
}

fn index_root(storage_root: &Path) -> PathBuf {
    storage_root.join("_index")
}

fn write_record_file(config: &MetricsStoreConfig, id: &str, bytes: &[u8]) -> Result<()> {
    let dir = shard_dir(&config.storage_root, id);
    fs::create_dir_all(&dir).map_err(RetroError::from)?;
    let path = dir.join(format!("{id}.json{}", if config.compression_enabled { ".gz" } else { "" }));
    if config.compression_enabled {
        let file = fs::File::create(&path).map_err(RetroError::from)?;
        let mut encoder = GzEncoder::new(file, Compression::new(config.compression_level));
        encoder.write_all(bytes).map_err(RetroError::from)?;
        encoder.finish().map_err(RetroError::from)?;
    } else {
        fs::write(&path, bytes).map_err(RetroError::from)?;
    }
    Ok(())
}

fn read_record_file(config: &MetricsStoreConfig, id: &str) -> Option<MetricRecord> {
    let dir = shard_dir(&config.storage_root, id);
    let compressed_path = dir.join(format!("{id}.json.gz"));
    let plain_path = dir.join(format!("{id}.json"));

    let bytes = if compressed_path.exists() {
        let file = fs::File::open(&compressed_path).ok()?;
        let mut decoder = GzDecoder::new(file);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf).ok()?;
        buf
    } else if plain_path.exists() {
        fs::read(&plain_path).ok()?
    } else {
        return None;
    };
    serde_json::from_slice(&bytes).ok()
}

fn load_indices(storage_root: &Path) -> Indices {
    let path = index_root(storage_root).join("indices.json");
    let Ok(bytes) = fs::read(&path) else {
        return Indices::default();
    };
    match serde_json::from_slice::<SerializedIndices>(&bytes) {
        Ok(s) => Indices {
            by_type: sets_from_map(s.by_type),
            by_model: sets_from_map(s.by_model),
            by_date: sets_from_map(s.by_date),
            by_tag: sets_from_map(s.by_tag),
        },
        Err(e) => {
            tracing::warn!(target: "retro::metrics", error = %e, "corrupt metrics index, starting empty");
            Indices::default()
        }
    }
}

fn persist_indices(storage_root: &Path, indices: &Indices) -> Result<()> {
    let serialized = SerializedIndices {
        by_type: sets_to_map(&indices.by_type),
        by_model: sets_to_map(&indices.by_model),
        by_date: sets_to_map(&indices.by_date),
        by_tag: sets_to_map(&indices.by_tag),
    };
    let bytes = serde_json::to_vec(&serialized)?;
    let path = index_root(storage_root).join("indices.json");
    fs::write(path, bytes).map_err(RetroError::from)
}

fn load_summary(storage_root: &Path) -> Summary {
    let path = index_root(storage_root).join("summary.json");
    let Ok(bytes) = fs::read(&path) else {
        return Summary::default();
    };
    match serde_json::from_slice::<SerializedSummary>(&bytes) {
        Ok(s) => Summary {
            count: s.count,
            total_cost: s.total_cost,
            api_calls: s.api_calls,
            token_usage: s.token_usage,
        },
        Err(_) => Summary::default(),
    }
}

fn persist_summary(storage_root: &Path, summary: &Summary) -> Result<()> {
    let serialized = SerializedSummary {
        count: summary.count,
        total_cost: summary.total_cost,
        api_calls: summary.api_calls,
        token_usage: summary.token_usage,
    };
    let bytes = serde_json::to_vec(&serialized)?;
    let path = index_root(storage_root).join("summary.json");
    fs::write(path, bytes).map_err(RetroError::from)
}

fn sets_to_map(map: &HashMap<String, HashSet<String>>) -> HashMap<String, Vec<String>> {
    map.iter().map(|(k, v)| (k.clone(), v.iter().cloned().collect())).collect()
}

fn sets_from_map(map: HashMap<String, Vec<String>>) -> HashMap<String, HashSet<String>> {
    map.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedIndices {
    by_type: HashMap<String, Vec<String>>,
    by_model: HashMap<String, Vec<String>>,
    by_date: HashMap<String, Vec<String>>,
    by_tag: HashMap<String, Vec<String>>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedSummary {
    count: u64,
    total_cost: f64,
    api_calls: u64,
    token_usage: u64,
}
