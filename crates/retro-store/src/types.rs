//! Metadata and query types for the data store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-supplied or store-assigned metadata for a stored item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataItemMetadata {
    /// Honoured verbatim if supplied; otherwise computed by content hash.
    pub id: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// `q` in `retrieve_by_query(q)`: each populated field narrows via its matching index; the result
/// is the intersection across populated fields.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    pub id: Option<String>,
    pub data_type: Option<String>,
    pub source_id: Option<String>,
    pub date: Option<chrono::NaiveDate>,
    pub tag: Option<String>,
}

/// Metadata for a named collection of items created by `store_dataset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_id: String,
    pub name: String,
    pub member_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}
