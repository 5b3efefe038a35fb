//! Shared, typed context threaded through every pipeline stage.
//!
//! The original passes a loosely-typed `dict` between stages; here each field the stages read or
//! write gets a concrete slot instead, which is the idiomatic Rust rendition of the same
//! shared-context pattern.

use retro_coordinator::{ParallelCoordinator, ResultsSummary};
use retro_core::Result;
use retro_metrics::MetricsStore;
use retro_store::DataStore;
use retro_trust::TrustTracker;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Injected results-upload hook. This repo does not implement a remote-object-storage client
/// (per the Non-goals); callers that need real uploads provide one.
pub type UploadHook = Arc<dyn Fn(&Path, &str) -> Result<()> + Send + Sync>;

pub struct PipelineContext {
    pub environment_config: HashMap<String, String>,
    pub is_aws_batch: bool,

    pub tracker: Arc<TrustTracker>,
    pub metrics_store: Arc<MetricsStore>,
    pub data_store: Option<Arc<DataStore>>,
    pub coordinator: Option<Arc<ParallelCoordinator>>,

    pub training_results: Option<ResultsSummary>,
    pub output_file: Option<String>,
    pub training_success: bool,
    pub training_error: Option<String>,

    pub s3_upload_success: Option<bool>,
    pub s3_upload_path: Option<String>,
    pub s3_upload_error: Option<String>,

    pub(crate) upload_hook: Option<UploadHook>,
    /// Set by the binary entrypoint's SIGINT/SIGTERM handler (§4.6); `DistributedSetupStage` wires
    /// it into the coordinator's cooperative cancellation. `None` outside an interactive CLI run.
    pub external_cancel: Option<Arc<AtomicBool>>,
}

impl PipelineContext {
    pub fn new(
        tracker: Arc<TrustTracker>,
        metrics_store: Arc<MetricsStore>,
        upload_hook: Option<UploadHook>,
        external_cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            environment_config: HashMap::new(),
            is_aws_batch: false,
            tracker,
            metrics_store,
            data_store: None,
            coordinator: None,
            training_results: None,
            output_file: None,
            training_success: false,
            training_error: None,
            s3_upload_success: None,
            s3_upload_path: None,
            s3_upload_error: None,
            upload_hook,
            external_cancel,
        }
    }
}
