//! C5 — content-addressed, versioned, compressed data store with secondary indices.
//!
//! Grounded broadly on `crates/storage/` (the sharded-map/index/registry split, the
//! cleaner's retention-scan idiom) adapted from the teacher's fixed KV value model to an
//! open payload type, content-addressed the way `examples/original_source/recursive_training/data_store.py`
//! derives its item ids.

use crate::hash::content_id;
use crate::types::{DataItemMetadata, DataQuery, DatasetMetadata};
use retro_core::{DataStoreConfig, RetroError, Result};

use chrono::{NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const FORMAT_BINCODE: u8 = 0;
const FORMAT_JSON: u8 = 1;

#[derive(Default)]
struct Indices {
    by_id: HashSet<String>,
    by_type: HashMap<String, HashSet<String>>,
    by_source: HashMap<String, HashSet<String>>,
    by_timestamp: HashMap<String, HashSet<String>>,
    by_tag: HashMap<String, HashSet<String>>,
}

struct State {
    indices: Indices,
}

/// Versioned, indexed, content-addressed store for arbitrary serialisable payloads.
pub struct DataStore {
    config: DataStoreConfig,
    state: RwLock<State>,
}

impl DataStore {
    pub fn open(config: DataStoreConfig) -> Result<Self> {
        let root = PathBuf::from(&config.storage_root);
        fs::create_dir_all(items_root(&root)).map_err(RetroError::from)?;
        fs::create_dir_all(index_root(&root)).map_err(RetroError::from)?;
        fs::create_dir_all(datasets_root(&root)).map_err(RetroError::from)?;

        let indices = load_indices(&root);
        Ok(Self {
            config,
            state: RwLock::new(State { indices }),
        })
    }

    fn root(&self) -> PathBuf {
        PathBuf::from(&self.config.storage_root)
    }

    /// Stores `payload` under `metadata.id` if supplied, else under its content hash. Honours
    /// `DataStoreConfig::versioning_enabled`/`max_versions`; always writes `latest.data`.
    pub fn store<T: Serialize>(&self, payload: &T, metadata: Option<DataItemMetadata>) -> Result<String> {
        let mut metadata = metadata.unwrap_or_default();

        let value = serde_json::to_value(payload).map_err(RetroError::from)?;
        let canonical_meta = canonical_metadata_bytes(&metadata)?;
        let payload_bytes_for_id = serde_json::to_vec(&value).map_err(RetroError::from)?;

        let id = metadata.id.clone().unwrap_or_else(|| content_id(&payload_bytes_for_id, &canonical_meta));
        metadata.id = Some(id.clone());
        let timestamp = metadata.timestamp.unwrap_or_else(Utc::now);
        metadata.timestamp = Some(timestamp);

        let (format_tag, encoded) = encode_value(&value)?;
        let bytes = compress_if_enabled(&self.config, format_tag, &encoded)?;

        let item_dir = item_dir_for(&self.root(), &id);
        fs::create_dir_all(&item_dir).map_err(RetroError::from)?;

        if self.config.versioning_enabled {
            let next_version = current_version(&item_dir) + 1;
            fs::write(item_dir.join(format!("v{next_version}.data")), &bytes).map_err(RetroError::from)?;
            prune_old_versions(&item_dir, self.config.max_versions as usize)?;
        }
        fs::write(item_dir.join("latest.data"), &bytes).map_err(RetroError::from)?;

        let meta_bytes = serde_json::to_vec(&metadata)?;
        fs::write(item_dir.join("metadata.json"), meta_bytes).map_err(RetroError::from)?;

        let mut state = self.state.write();
        state.indices.by_id.insert(id.clone());
        if let Some(data_type) = &metadata.data_type {
            state.indices.by_type.entry(data_type.clone()).or_default().insert(id.clone());
        }
        if let Some(source_id) = &metadata.source_id {
            state.indices.by_source.entry(source_id.clone()).or_default().insert(id.clone());
        }
        state
            .indices
            .by_timestamp
            .entry(timestamp.date_naive().to_string())
            .or_default()
            .insert(id.clone());
        for tag in &metadata.tags {
            state.indices.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }
        if let Err(e) = persist_indices(&self.root(), &state.indices) {
            tracing::warn!(target: "retro::store", error = %e, "failed to persist data store indices");
        }

        Ok(id)
    }

    /// Reads `version` (or `latest` if `None`), returning `None` on any missing/corrupt read.
    pub fn retrieve<T: DeserializeOwned>(&self, id: &str, version: Option<u32>) -> Option<T> {
        let value = self.retrieve_value(id, version)?;
        serde_json::from_value(value).ok()
    }

    fn retrieve_value(&self, id: &str, version: Option<u32>) -> Option<serde_json::Value> {
        let item_dir = item_dir_for(&self.root(), id);
        let filename = match version {
            Some(v) => format!("v{v}.data"),
            None => "latest.data".to_string(),
        };
        let bytes = fs::read(item_dir.join(filename)).ok()?;
        let decoded = decompress_if_needed(&self.config, &bytes).ok()?;
        decode_value(&decoded)
    }

    pub fn retrieve_metadata(&self, id: &str) -> Option<DataItemMetadata> {
        let path = item_dir_for(&self.root(), id).join("metadata.json");
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Intersection of the index sets named by the populated fields of `q`.
    pub fn retrieve_by_query(&self, q: &DataQuery) -> Vec<(String, serde_json::Value)> {
        let state = self.state.read();
        let mut candidate: Option<HashSet<String>> = None;

        if let Some(id) = &q.id {
            candidate = Some(narrow(candidate, std::iter::once(id.clone()).collect()));
        }
        if let Some(data_type) = &q.data_type {
            let set = state.indices.by_type.get(data_type).cloned().unwrap_or_default();
            candidate = Some(narrow(candidate, set));
        }
        if let Some(source_id) = &q.source_id {
            let set = state.indices.by_source.get(source_id).cloned().unwrap_or_default();
            candidate = Some(narrow(candidate, set));
        }
        if let Some(date) = &q.date {
            let set = state.indices.by_timestamp.get(&date.to_string()).cloned().unwrap_or_default();
            candidate = Some(narrow(candidate, set));
        }
        if let Some(tag) = &q.tag {
            let set = state.indices.by_tag.get(tag).cloned().unwrap_or_default();
            candidate = Some(narrow(candidate, set));
        }

        let ids = candidate.unwrap_or_else(|| state.indices.by_id.clone());
        drop(state);

        ids.into_iter().filter_map(|id| self.retrieve_value(&id, None).map(|v| (id, v))).collect()
    }

    /// Stores every item in `items`, then writes an auxiliary dataset metadata file recording the
    /// resulting member ids.
    pub fn store_dataset<T: Serialize>(
        &self,
        name: &str,
        items: &[T],
        metadata: Option<DataItemMetadata>,
    ) -> Result<String> {
        let mut member_ids = Vec::with_capacity(items.len());
        for item in items {
            let mut item_meta = metadata.clone().unwrap_or_default();
            item_meta.id = None; // each member gets its own content-derived id
            item_meta.extra.insert("dataset_name".to_string(), serde_json::json!(name));
            member_ids.push(self.store(item, Some(item_meta))?);
        }

        let dataset_id = content_id(name.as_bytes(), format!("{:?}", Utc::now()).as_bytes());
        let dataset_meta = DatasetMetadata {
            dataset_id: dataset_id.clone(),
            name: name.to_string(),
            member_ids,
            created_at: Utc::now(),
            extra: metadata.map(|m| m.extra).unwrap_or_default(),
        };

        let dir = datasets_root(&self.root()).join(name);
        fs::create_dir_all(&dir).map_err(RetroError::from)?;
        write_dataset_files(&dir, &dataset_id, &dataset_meta)?;

        Ok(dataset_id)
    }

    /// Reads back a dataset: an explicit `dataset_id`, or (if `None`) the most recently modified
    /// metadata file under `name`.
    pub fn retrieve_dataset(&self, name: &str, dataset_id: Option<&str>) -> Option<(Vec<serde_json::Value>, DatasetMetadata)> {
        let dir = datasets_root(&self.root()).join(name);
        let meta_path = match dataset_id {
            Some(id) => dir.join(format!("{id}_metadata.json")),
            None => latest_metadata_file(&dir)?,
        };
        let meta = read_dataset_files(&meta_path)?;
        let items = meta.member_ids.iter().filter_map(|id| self.retrieve_value(id, None)).collect();
        Some((items, meta))
    }

    /// Every dataset metadata file across every dataset name.
    pub fn get_all_datasets(&self) -> Vec<DatasetMetadata> {
        let root = datasets_root(&self.root());
        let Ok(names) = fs::read_dir(&root) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for name_entry in names.flatten() {
            let Ok(files) = fs::read_dir(name_entry.path()) else {
                continue;
            };
            for file_entry in files.flatten() {
                let path = file_entry.path();
                if path.file_name().and_then(|n| n.to_str()).map(|n| n.ends_with("_metadata.json")).unwrap_or(false) {
                    if let Some(meta) = read_dataset_files(&path) {
                        out.push(meta);
                    }
                }
            }
        }
        out
    }

    /// Removes every item whose `by_timestamp` date bucket is older than `retention_days` (or the
    /// configured default). Returns the number of items removed.
    pub fn cleanup(&self, retention_days: Option<i64>) -> Result<usize> {
        let retention_days = retention_days.unwrap_or(self.config.retention_days as i64);
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();

        let mut state = self.state.write();
        let stale_dates: Vec<String> = state
            .indices
            .by_timestamp
            .keys()
            .filter(|date_str| parse_date(date_str).map(|d| d < cutoff).unwrap_or(false))
            .cloned()
            .collect();

        let mut removed = 0usize;
        for date in stale_dates {
            let ids: Vec<String> = state.indices.by_timestamp.remove(&date).into_iter().flatten().collect();
            for id in ids {
                let item_dir = item_dir_for(&self.root(), &id);
                let _ = fs::remove_dir_all(&item_dir);
                state.indices.by_id.remove(&id);
                for set in state.indices.by_type.values_mut() {
                    set.remove(&id);
                }
                for set in state.indices.by_source.values_mut() {
                    set.remove(&id);
                }
                for set in state.indices.by_tag.values_mut() {
                    set.remove(&id);
                }
                removed += 1;
            }
        }
        if let Err(e) = persist_indices(&self.root(), &state.indices) {
            tracing::warn!(target: "retro::store", error = %e, "failed to persist indices after cleanup");
        }
        Ok(removed)
    }

    /// Tabular export of a query result, realised as CSV (no dataframe dependency in this stack).
    pub fn export_to_dataframe(&self, q: &DataQuery) -> String {
        let rows = self.retrieve_by_query(q);
        let mut out = String::from("id,payload_json\n");
        for (id, value) in rows {
            out.push_str(&format!("{},\"{}\"\n", id, value.to_string().replace('"', "\"\"")));
        }
        out
    }
}

fn narrow(candidate: Option<HashSet<String>>, set: HashSet<String>) -> HashSet<String> {
    match candidate {
        Some(existing) => existing.intersection(&set).cloned().collect(),
        None => set,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn encode_value(value: &serde_json::Value) -> Result<(u8, Vec<u8>)> {
    match bincode::serialize(value) {
        Ok(bytes) => Ok((FORMAT_BINCODE, bytes)),
        Err(_) => {
            let bytes = serde_json::to_vec(value)?;
            Ok((FORMAT_JSON, bytes))
        }
    }
}

fn decode_value(tagged: &[u8]) -> Option<serde_json::Value> {
    let (tag, body) = tagged.split_first()?;
    match *tag {
        FORMAT_BINCODE => bincode::deserialize(body).ok(),
        FORMAT_JSON => serde_json::from_slice(body).ok(),
        _ => None,
    }
}

fn compress_if_enabled(config: &DataStoreConfig, format_tag: u8, encoded: &[u8]) -> Result<Vec<u8>> {
    let mut tagged = Vec::with_capacity(encoded.len() + 1);
    tagged.push(format_tag);
    tagged.extend_from_slice(encoded);

    if !config.compression_enabled {
        return Ok(tagged);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(config.compression_level));
    encoder.write_all(&tagged).map_err(RetroError::from)?;
    encoder.finish().map_err(RetroError::from)
}

fn decompress_if_needed(config: &DataStoreConfig, bytes: &[u8]) -> Result<Vec<u8>> {
    if !config.compression_enabled {
        return Ok(bytes.to_vec());
    }
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) => Ok(bytes.to_vec()), // transparent fall-through for uncompressed legacy data
    }
}

fn canonical_metadata_bytes(metadata: &DataItemMetadata) -> Result<Vec<u8>> {
    let mut sorted_tags = metadata.tags.clone();
    sorted_tags.sort();
    let canonical = serde_json::json!({
        "data_type": metadata.data_type,
        "source_id": metadata.source_id,
        "tags": sorted_tags,
        "extra": metadata.extra,
    });
    serde_json::to_vec(&canonical).map_err(RetroError::from)
}

fn current_version(item_dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(item_dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| name.strip_prefix('v').and_then(|rest| rest.strip_suffix(".data")).and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0)
}

fn prune_old_versions(item_dir: &Path, max_versions: usize) -> Result<()> {
    let Ok(entries) = fs::read_dir(item_dir) else {
        return Ok(());
    };
    let mut versions: Vec<u32> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| name.strip_prefix('v').and_then(|rest| rest.strip_suffix(".data")).and_then(|n| n.parse::<u32>().ok()))
        .collect();
    versions.sort_unstable();
    if versions.len() > max_versions {
        for v in &versions[..versions.len() - max_versions] {
            let _ = fs::remove_file(item_dir.join(format!("v{v}.data")));
        }
    }
    Ok(())
}

fn items_root(root: &Path) -> PathBuf {
    root.join("data")
}

/// Shards items two hex characters deep so no single directory accumulates every id.
fn item_dir_for(root: &Path, id: &str) -> PathBuf {
    let prefix = if id.len() >= 2 { &id[..2] } else { id };
    items_root(root).join(prefix).join(id)
}

fn index_root(root: &Path) -> PathBuf {
    root.join("_index")
}

fn datasets_root(root: &Path) -> PathBuf {
    root.join("datasets")
}

/// On-disk twin of [`DatasetMetadata`] with `member_ids` split out into its own `_items.json` file.
#[derive(serde::Serialize, serde::Deserialize)]
struct DatasetMetadataFile {
    dataset_id: String,
    name: String,
    created_at: chrono::DateTime<Utc>,
    #[serde(default)]
    extra: HashMap<String, serde_json::Value>,
}

fn write_dataset_files(dir: &Path, dataset_id: &str, meta: &DatasetMetadata) -> Result<()> {
    let meta_file = DatasetMetadataFile {
        dataset_id: meta.dataset_id.clone(),
        name: meta.name.clone(),
        created_at: meta.created_at,
        extra: meta.extra.clone(),
    };
    fs::write(dir.join(format!("{dataset_id}_metadata.json")), serde_json::to_vec(&meta_file)?).map_err(RetroError::from)?;
    fs::write(dir.join(format!("{dataset_id}_items.json")), serde_json::to_vec(&meta.member_ids)?).map_err(RetroError::from)?;
    Ok(())
}

/// Reconstructs a [`DatasetMetadata`] from its `_metadata.json` path, reading the sibling
/// `_items.json` for `member_ids`.
fn read_dataset_files(metadata_path: &Path) -> Option<DatasetMetadata> {
    let meta_bytes = fs::read(metadata_path).ok()?;
    let meta_file: DatasetMetadataFile = serde_json::from_slice(&meta_bytes).ok()?;

    let items_path = metadata_path.to_string_lossy().replace("_metadata.json", "_items.json");
    let items_bytes = fs::read(items_path).ok()?;
    let member_ids: Vec<String> = serde_json::from_slice(&items_bytes).ok()?;

    Some(DatasetMetadata {
        dataset_id: meta_file.dataset_id,
        name: meta_file.name,
        member_ids,
        created_at: meta_file.created_at,
        extra: meta_file.extra,
    })
}

fn latest_metadata_file(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| n.ends_with("_metadata.json")).unwrap_or(false))
        .max_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok())
}

fn load_indices(root: &Path) -> Indices {
    let path = index_root(root).join("indices.json");
    let Ok(bytes) = fs::read(&path) else {
        return Indices::default();
    };
    match serde_json::from_slice::<SerializedIndices>(&bytes) {
        Ok(s) => Indices {
            by_id: s.by_id.into_iter().collect(),
            by_type: sets_from_map(s.by_type),
            by_source: sets_from_map(s.by_source),
            by_timestamp: sets_from_map(s.by_timestamp),
            by_tag: sets_from_map(s.by_tag),
        },
        Err(e) => {
            tracing::warn!(target: "retro::store", error = %e, "corrupt data store index, starting empty");
            Indices::default()
        }
    }
}

fn persist_indices(root: &Path, indices: &Indices) -> Result<()> {
    let serialized = SerializedIndices {
        by_id: indices.by_id.iter().cloned().collect(),
        by_type: sets_to_map(&indices.by_type),
        by_source: sets_to_map(&indices.by_source),
        by_timestamp: sets_to_map(&indices.by_timestamp),
        by_tag: sets_to_map(&indices.by_tag),
    };
    let bytes = serde_json::to_vec(&serialized)?;
    fs::write(index_root(root).join("indices.json"), bytes).map_err(RetroError::from)
}

fn sets_to_map(map: &HashMap<String, HashSet<String>>) -> HashMap<String, Vec<String>> {
    map.iter().map(|(k, v)| (k.clone(), v.iter().cloned().collect())).collect()
}

fn sets_from_map(map: HashMap<String, Vec<String>>) -> HashMap<String, HashSet<String>> {
    map.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedIndices {
    by_id: Vec<String>,
    by_type: HashMap<String, Vec<String>>,
    by_source: HashMap<String, Vec<String>>,
    by_timestamp: HashMap<String, Vec<String>>,
    by_tag: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Sample {
        name: String,
        value: i64,
    }

    fn store_in(tmp: &Path) -> DataStore {
        DataStore::open(DataStoreConfig {
            storage_root: tmp.to_string_lossy().to_string(),
            ..DataStoreConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn store_then_retrieve_round_trips() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let item = Sample { name: "a".into(), value: 1 };
        let id = store.store(&item, None).unwrap();
        let fetched: Sample = store.retrieve(&id, None).unwrap();
        assert_eq!(fetched, item);
    }

    #[test]
    fn same_payload_and_metadata_produce_same_id() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let item = Sample { name: "a".into(), value: 1 };
        let id1 = store.store(&item, None).unwrap();
        let id2 = store.store(&item, None).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn explicit_id_is_honoured() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let item = Sample { name: "a".into(), value: 1 };
        let meta = DataItemMetadata { id: Some("custom-id".to_string()), ..Default::default() };
        let id = store.store(&item, Some(meta)).unwrap();
        assert_eq!(id, "custom-id");
    }

    #[test]
    fn versioning_keeps_only_max_versions() {
        let dir = tempdir().unwrap();
        let store = DataStore::open(DataStoreConfig {
            storage_root: dir.path().to_string_lossy().to_string(),
            max_versions: 2,
            ..DataStoreConfig::default()
        })
        .unwrap();
        let meta = DataItemMetadata { id: Some("fixed".to_string()), ..Default::default() };
        for v in 0..5 {
            let item = Sample { name: "a".into(), value: v };
            store.store(&item, Some(meta.clone())).unwrap();
        }
        let item_dir = item_dir_for(&store.root(), "fixed");
        let version_files: Vec<_> = fs::read_dir(&item_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('v'))
            .collect();
        assert_eq!(version_files.len(), 2);
    }

    #[test]
    fn retrieve_by_query_intersects_type_and_tag() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .store(
                &Sample { name: "a".into(), value: 1 },
                Some(DataItemMetadata { data_type: Some("obs".into()), tags: vec!["keep".into()], ..Default::default() }),
            )
            .unwrap();
        store
            .store(
                &Sample { name: "b".into(), value: 2 },
                Some(DataItemMetadata { data_type: Some("obs".into()), tags: vec!["drop".into()], ..Default::default() }),
            )
            .unwrap();

        let results = store.retrieve_by_query(&DataQuery {
            data_type: Some("obs".into()),
            tag: Some("keep".into()),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn store_dataset_then_retrieve_round_trips() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let items = vec![Sample { name: "a".into(), value: 1 }, Sample { name: "b".into(), value: 2 }];
        let dataset_id = store.store_dataset("demo", &items, None).unwrap();
        let (fetched, meta) = store.retrieve_dataset("demo", Some(&dataset_id)).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(meta.member_ids.len(), 2);
    }

    #[test]
    fn retrieve_dataset_without_id_picks_latest() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.store_dataset("demo", &[Sample { name: "a".into(), value: 1 }], None).unwrap();
        let (items, _meta) = store.retrieve_dataset("demo", None).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn get_all_datasets_lists_every_name() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.store_dataset("a", &[Sample { name: "x".into(), value: 1 }], None).unwrap();
        store.store_dataset("b", &[Sample { name: "y".into(), value: 2 }], None).unwrap();
        assert_eq!(store.get_all_datasets().len(), 2);
    }

    #[test]
    fn cleanup_removes_items_older_than_retention() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let old_timestamp = Utc::now() - chrono::Duration::days(365);
        store
            .store(
                &Sample { name: "old".into(), value: 1 },
                Some(DataItemMetadata { timestamp: Some(old_timestamp), ..Default::default() }),
            )
            .unwrap();
        store.store(&Sample { name: "new".into(), value: 2 }, None).unwrap();

        let removed = store.cleanup(Some(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.retrieve_by_query(&DataQuery::default()).len(), 1);
    }

    #[test]
    fn retrieve_missing_id_returns_none() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let fetched: Option<Sample> = store.retrieve("nope", None);
        assert!(fetched.is_none());
    }

    #[test]
    fn indices_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = store_in(dir.path());
            store
                .store(&Sample { name: "a".into(), value: 1 }, Some(DataItemMetadata { tags: vec!["t1".into()], ..Default::default() }))
                .unwrap()
        };
        let reopened = store_in(dir.path());
        let results = reopened.retrieve_by_query(&DataQuery { tag: Some("t1".into()), ..Default::default() });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, id);
    }
}
