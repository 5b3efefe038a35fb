//! C6 — training batch planning.
//!
//! A pure function generating overlapping date-range batches, grounded on
//! `parallel_trainer.py::prepare_training_batches`'s advancing-window loop.

use retro_core::{RetroError, Result};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single batch's worker task, once it has run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub total_data_points: u64,
    pub variables_processed: usize,
    pub time_period_days: i64,
    pub avg_success_rate: f64,
    pub skipped: bool,
}

/// One planned (and, eventually, executed) unit of training work.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    pub id: String,
    pub variables: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub processing_time: Option<Duration>,
    pub metrics: Option<BatchMetrics>,
    pub error: Option<String>,
}

impl TrainingBatch {
    fn new(index: usize, variables: Vec<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: format!("batch-{index:05}"),
            variables,
            start,
            end,
            processing_time: None,
            metrics: None,
            error: None,
        }
    }
}

/// Generates batches of `batch_days` length advancing by `batch_days − overlap_days`, skipping a
/// trailing batch shorter than 24 hours and honouring `batch_limit`.
pub fn prepare_training_batches(
    variables: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    batch_days: i64,
    overlap_days: i64,
    batch_limit: Option<usize>,
) -> Result<Vec<TrainingBatch>> {
    if variables.is_empty() {
        return Err(RetroError::invalid_input("variables must not be empty"));
    }
    if start >= end {
        return Err(RetroError::invalid_input("start must be before end"));
    }
    if batch_days <= 0 {
        return Err(RetroError::invalid_input("batch_days must be positive"));
    }
    let step_days = batch_days - overlap_days;
    if step_days <= 0 {
        return Err(RetroError::invalid_input("overlap_days must be smaller than batch_days"));
    }

    let mut batches = Vec::new();
    let mut cursor = start;
    let min_batch = ChronoDuration::hours(24);

    while cursor < end {
        let batch_end = (cursor + ChronoDuration::days(batch_days)).min(end);
        if batch_end - cursor < min_batch {
            break;
        }
        batches.push(TrainingBatch::new(batches.len(), variables.to_vec(), cursor, batch_end));
        if let Some(limit) = batch_limit {
            if batches.len() >= limit {
                break;
            }
        }
        if batch_end >= end {
            break;
        }
        // Derive the next cursor from the batch actually emitted, not a constant stride — a
        // window-end-capped batch must not be re-entered with a spurious near-duplicate tail.
        cursor = batch_end - ChronoDuration::days(overlap_days);
    }

    Ok(batches)
}
