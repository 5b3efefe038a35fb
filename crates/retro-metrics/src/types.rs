//! Metric record shape shared between the store (C3) and the collector (C4).
//!
//! Replaces the original's dynamic per-call dictionary with a required header plus a free-form
//! payload map (design note: "dynamic dictionaries as metric records").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single metric observation: a required header plus an open payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Assigned by `store_metric`/`submit_metric` if absent at submission time.
    pub id: Option<String>,
    /// Filled with `now` by the store if absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub metric_type: String,
    pub model: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

impl MetricRecord {
    pub fn new(metric_type: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            metric_type: metric_type.into(),
            model: None,
            tags: Vec::new(),
            payload: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Filter accepted by `query_metrics`. Every populated field narrows the result; the final result
/// is the intersection across populated filters.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub metric_types: Option<Vec<String>>,
    pub models: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Status band returned by `track_cost`, derived from three configurable thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostStatus {
    Ok,
    Warning,
    Critical,
    Shutdown,
}

/// Result of `track_cost`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostTracking {
    pub total_cost: f64,
    pub api_calls: u64,
    pub token_usage: u64,
    pub status: CostStatus,
}
