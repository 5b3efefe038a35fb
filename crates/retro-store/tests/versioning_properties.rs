//! Property test over C5's versioning invariant: storing N payloads under one fixed id, with
//! `max_versions` capped, always leaves exactly `min(N, max_versions)` version files on disk.

use proptest::prelude::*;
use retro_core::DataStoreConfig;
use retro_store::{DataItemMetadata, DataStore};
use std::fs;
use tempfile::tempdir;

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    #[test]
    fn store_count_caps_version_files_at_max_versions(store_count in 1usize..20, max_versions in 1u32..10) {
        let dir = tempdir().unwrap();
        let store = DataStore::open(DataStoreConfig {
            storage_root: dir.path().to_string_lossy().to_string(),
            max_versions,
            ..DataStoreConfig::default()
        })
        .unwrap();

        let meta = DataItemMetadata { id: Some("fixed".to_string()), ..Default::default() };
        for v in 0..store_count {
            store.store(&serde_json::json!({ "v": v }), Some(meta.clone())).unwrap();
        }

        let item_dir = dir.path().join("data").join("fi").join("fixed");
        let version_files = fs::read_dir(&item_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with('v') && e.file_name().to_string_lossy().ends_with(".data"))
            .count();

        prop_assert_eq!(version_files, store_count.min(max_versions as usize));
    }
}
