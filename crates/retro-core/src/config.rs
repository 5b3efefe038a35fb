//! Run configuration.
//!
//! `RetroConfig` is the single typed configuration value for a training run, replacing the
//! mutable-global-defaults pattern named in the design notes: it is built once, validated once,
//! and immutable afterward. Environment variable overrides are applied before validation, mirroring
//! the original `TrainingConfig.__post_init__` precedence (env vars beat file/builder defaults).

use crate::error::{RetroError, Result};
use serde::{Deserialize, Serialize};
use std::env;

fn default_batch_size_days() -> u32 {
    30
}
fn default_start_date() -> String {
    "2022-01-01".to_string()
}
fn default_aws_region() -> String {
    "us-east-1".to_string()
}
fn default_s3_data_prefix() -> String {
    "datasets/".to_string()
}
fn default_s3_results_prefix() -> String {
    "results/".to_string()
}
fn default_worker_threads() -> usize {
    1
}
fn default_dashboard_port() -> u16 {
    8787
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}

/// Configuration for the trust-update buffer (C2). Defaults match the original `{1000, 100, 5.0}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustBufferConfig {
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default = "default_auto_flush_interval_sec")]
    pub auto_flush_interval_sec: f64,
}

fn default_max_buffer_size() -> usize {
    1000
}
fn default_flush_threshold() -> usize {
    100
}
fn default_auto_flush_interval_sec() -> f64 {
    5.0
}

impl Default for TrustBufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            flush_threshold: default_flush_threshold(),
            auto_flush_interval_sec: default_auto_flush_interval_sec(),
        }
    }
}

/// Configuration for the async metrics collector (C4). Defaults match the original
/// `{batch_size=50, flush_interval=5.0, max_retries=3, retry_delay=1.0}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsCollectorConfig {
    #[serde(default = "default_metrics_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_sec")]
    pub flush_interval_sec: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_sec")]
    pub retry_delay_sec: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_metrics_batch_size() -> usize {
    50
}
fn default_flush_interval_sec() -> f64 {
    5.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_sec() -> f64 {
    1.0
}
fn default_queue_capacity() -> usize {
    10_000
}

impl Default for MetricsCollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_metrics_batch_size(),
            flush_interval_sec: default_flush_interval_sec(),
            max_retries: default_max_retries(),
            retry_delay_sec: default_retry_delay_sec(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Configuration for the content-addressed data store (C5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataStoreConfig {
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default = "default_true")]
    pub versioning_enabled: bool,
    #[serde(default = "default_max_versions")]
    pub max_versions: u32,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_storage_root() -> String {
    "./data/recursive_training".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_versions() -> u32 {
    5
}
fn default_compression_level() -> u32 {
    6
}
fn default_retention_days() -> u32 {
    90
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            versioning_enabled: true,
            max_versions: default_max_versions(),
            compression_enabled: true,
            compression_level: default_compression_level(),
            retention_days: default_retention_days(),
        }
    }
}

/// Top-level, validated, immutable configuration for one training run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetroConfig {
    pub variables: Vec<String>,
    #[serde(default = "default_batch_size_days")]
    pub batch_size_days: u32,
    #[serde(default = "default_overlap_days")]
    pub overlap_days: u32,
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub batch_limit: Option<usize>,

    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default)]
    pub s3_data_bucket: Option<String>,
    #[serde(default)]
    pub s3_results_bucket: Option<String>,
    #[serde(default = "default_s3_data_prefix")]
    pub s3_data_prefix: String,
    #[serde(default = "default_s3_results_prefix")]
    pub s3_results_prefix: String,

    #[serde(default)]
    pub use_worker_pool: bool,
    #[serde(default = "default_worker_threads")]
    pub threads_per_worker: usize,
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,

    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub s3_output_file: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default)]
    pub trust_buffer: TrustBufferConfig,
    #[serde(default)]
    pub metrics_collector: MetricsCollectorConfig,
    #[serde(default)]
    pub data_store: DataStoreConfig,
}

fn default_overlap_days() -> u32 {
    0
}

impl RetroConfig {
    /// A minimal, otherwise-defaulted configuration for the given variables.
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            variables,
            batch_size_days: default_batch_size_days(),
            overlap_days: default_overlap_days(),
            start_date: default_start_date(),
            end_date: None,
            max_workers: None,
            batch_limit: None,
            aws_region: default_aws_region(),
            s3_data_bucket: None,
            s3_results_bucket: None,
            s3_data_prefix: default_s3_data_prefix(),
            s3_results_prefix: default_s3_results_prefix(),
            use_worker_pool: false,
            threads_per_worker: default_worker_threads(),
            dashboard_port: default_dashboard_port(),
            output_file: None,
            s3_output_file: None,
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            trust_buffer: TrustBufferConfig::default(),
            metrics_collector: MetricsCollectorConfig::default(),
            data_store: DataStoreConfig::default(),
        }
    }

    /// Apply environment variable overrides, matching the original's env_mappings table.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("AWS_REGION") {
            if !v.is_empty() {
                self.aws_region = v;
            }
        }
        if let Ok(v) = env::var("S3_DATA_BUCKET") {
            if !v.is_empty() {
                self.s3_data_bucket = Some(v);
            }
        }
        if let Ok(v) = env::var("S3_RESULTS_BUCKET") {
            if !v.is_empty() {
                self.s3_results_bucket = Some(v);
            }
        }
        if let Ok(v) = env::var("LOG_LEVEL") {
            if !v.is_empty() {
                self.log_level = v;
            }
        }
        if let Ok(v) = env::var("LOG_DIR") {
            if !v.is_empty() {
                self.log_dir = v;
            }
        }
    }

    /// Validate the configuration, following `TrainingConfig.validate()`.
    pub fn validate(&self) -> Result<()> {
        if self.variables.is_empty() {
            return Err(RetroError::invalid_input("variables list cannot be empty"));
        }
        if self.batch_size_days == 0 {
            return Err(RetroError::invalid_input("batch_size_days must be positive"));
        }
        let start = chrono::NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d")
            .map_err(|_| RetroError::invalid_input("invalid start_date format"))?;
        if let Some(end_date) = &self.end_date {
            let end = chrono::NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
                .map_err(|_| RetroError::invalid_input("invalid end_date format"))?;
            if start >= end {
                return Err(RetroError::invalid_input("end_date must be after start_date"));
            }
        }
        if matches!(self.max_workers, Some(0)) {
            return Err(RetroError::invalid_input("max_workers must be positive"));
        }
        if matches!(self.batch_limit, Some(0)) {
            return Err(RetroError::invalid_input("batch_limit must be positive"));
        }
        const VALID_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
        if !VALID_LEVELS.contains(&self.log_level.as_str()) {
            return Err(RetroError::invalid_input("invalid log_level"));
        }
        Ok(())
    }

    /// Build, apply env overrides, and validate in one call — the `create_training_config` analogue.
    pub fn build(variables: Vec<String>) -> Result<Self> {
        let mut config = Self::new(variables);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// `AWS_BATCH_JOB_ID`-derived output path, used by S4's output-path preference order.
    pub fn aws_batch_output_path(&self, timestamp: &str) -> Option<String> {
        let job_id = env::var("AWS_BATCH_JOB_ID").ok()?;
        if !job_id.is_empty() && self.s3_results_bucket.is_some() {
            Some(format!("results/batch_jobs/{job_id}/results_{timestamp}.json"))
        } else {
            None
        }
    }

    /// Remote (S3-style) output path, used by S5's upload decision.
    pub fn s3_output_path(&self, timestamp: &str) -> Option<String> {
        if let Some(explicit) = &self.s3_output_file {
            return Some(explicit.clone());
        }
        let bucket = self.s3_results_bucket.as_ref()?;
        if let Ok(job_id) = env::var("AWS_BATCH_JOB_ID") {
            if !job_id.is_empty() {
                let key = format!(
                    "{}batch_jobs/{}/results_{}.json",
                    self.s3_results_prefix, job_id, timestamp
                );
                return Some(format!("s3://{bucket}/{key}"));
            }
        }
        let key = format!("{}training_local_{}.json", self.s3_results_prefix, timestamp);
        Some(format!("s3://{bucket}/{key}"))
    }

    /// True when running as an AWS-Batch-style job (S1's `is_batch_job` flag).
    pub fn is_batch_job(&self) -> bool {
        env::var("AWS_BATCH_JOB_ID")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }
}
