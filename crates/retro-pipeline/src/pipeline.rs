//! The orchestrator itself: runs stages in order, rolls back on failure, and always cleans up.
//!
//! Grounded on `training_stages.py::TrainingPipeline`. The `finally`-equivalent cleanup block
//! re-invokes every executed, rollback-capable stage's rollback hook once more on every terminal
//! path — including the success path, where it is the only rollback call those stages get. This
//! is why every `rollback()` impl in [`crate::stages`] must be safe to call twice.

use crate::context::{PipelineContext, UploadHook};
use crate::stage::Stage;
use crate::stages::{DataStoreSetupStage, DistributedSetupStage, EnvironmentSetupStage, ResultsUploadStage, TrainingExecutionStage};

use retro_core::{RetroConfig, Result};
use retro_metrics::MetricsStore;
use retro_trust::TrustTracker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct PipelineOrchestrator {
    stages: Vec<Box<dyn Stage>>,
    upload_hook: Option<UploadHook>,
    external_cancel: Option<Arc<AtomicBool>>,
}

impl PipelineOrchestrator {
    pub fn new(upload_hook: Option<UploadHook>) -> Self {
        Self::with_cancel(upload_hook, None)
    }

    /// Like [`Self::new`], but also wires an external cancellation flag (e.g. a signal handler)
    /// into the distributed-setup stage.
    pub fn with_cancel(upload_hook: Option<UploadHook>, external_cancel: Option<Arc<AtomicBool>>) -> Self {
        Self {
            stages: vec![
                Box::new(EnvironmentSetupStage),
                Box::new(DataStoreSetupStage),
                Box::new(DistributedSetupStage),
                Box::new(TrainingExecutionStage),
                Box::new(ResultsUploadStage),
            ],
            upload_hook,
            external_cancel,
        }
    }

    /// Runs the full pipeline. On stage failure, rolls back executed stages in reverse order and
    /// re-raises; either way, cleanup walks executed stages forward one more time before
    /// returning.
    pub fn execute(&self, config: &RetroConfig, tracker: Arc<TrustTracker>, metrics_store: Arc<MetricsStore>) -> Result<PipelineContext> {
        tracing::info!(target: "retro::pipeline", "starting training pipeline execution");
        let mut ctx = PipelineContext::new(tracker, metrics_store, self.upload_hook.clone(), self.external_cancel.clone());
        let mut executed: Vec<&dyn Stage> = Vec::new();
        let mut failure: Option<retro_core::RetroError> = None;

        for stage in &self.stages {
            let stage_ref: &dyn Stage = stage.as_ref();
            tracing::info!(target: "retro::pipeline", stage = stage_ref.name(), "executing stage");
            match stage_ref.execute(config, &mut ctx) {
                Ok(()) => {
                    executed.push(stage_ref);
                    tracing::info!(target: "retro::pipeline", stage = stage_ref.name(), "stage completed successfully");
                }
                Err(e) => {
                    tracing::error!(target: "retro::pipeline", stage = stage_ref.name(), error = %e, "stage failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_some() {
            tracing::info!(target: "retro::pipeline", "starting pipeline rollback");
            for stage in executed.iter().rev() {
                if stage.can_rollback() {
                    tracing::info!(target: "retro::pipeline", stage = stage.name(), "rolling back stage");
                    stage.rollback(config, &mut ctx);
                }
            }
        }

        tracing::info!(target: "retro::pipeline", "cleaning up pipeline resources");
        for stage in &executed {
            if stage.can_rollback() {
                stage.rollback(config, &mut ctx);
            }
        }

        match failure {
            Some(e) => {
                tracing::error!(target: "retro::pipeline", error = %e, "training pipeline failed");
                Err(e)
            }
            None => {
                tracing::info!(target: "retro::pipeline", "training pipeline completed successfully");
                Ok(ctx)
            }
        }
    }
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retro_core::{DataStoreConfig, RetroConfig};
    use retro_metrics::MetricsStoreConfig;
    use tempfile::tempdir;

    fn config(tmp: &std::path::Path, variables: Vec<&str>) -> RetroConfig {
        let mut config = RetroConfig::new(variables.into_iter().map(String::from).collect());
        config.log_dir = tmp.join("logs").to_string_lossy().to_string();
        config.start_date = "2022-01-01".to_string();
        config.end_date = Some("2022-03-01".to_string());
        config.output_file = Some(tmp.join("results.json").to_string_lossy().to_string());
        config.data_store = DataStoreConfig {
            storage_root: tmp.join("data").to_string_lossy().to_string(),
            ..DataStoreConfig::default()
        };
        config
    }

    fn shared(tmp: &std::path::Path) -> (Arc<TrustTracker>, Arc<MetricsStore>) {
        let tracker = Arc::new(TrustTracker::new());
        let metrics_store = Arc::new(
            MetricsStore::open(MetricsStoreConfig { storage_root: tmp.join("metrics"), ..MetricsStoreConfig::default() }).unwrap(),
        );
        (tracker, metrics_store)
    }

    #[test]
    fn full_pipeline_run_succeeds_and_writes_output() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), vec!["v1"]);
        let (tracker, metrics_store) = shared(dir.path());
        let orchestrator = PipelineOrchestrator::default();

        let ctx = orchestrator.execute(&config, tracker, metrics_store).unwrap();
        assert!(ctx.training_success);
        assert!(ctx.training_results.is_some());
        assert!(std::path::Path::new(&config.output_file.unwrap()).exists());
    }

    #[test]
    fn invalid_config_rolls_back_and_propagates_error() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), vec!["v1"]);
        config.batch_size_days = 0; // triggers TrainingExecutionStage -> prepare_training_batches failure
        let (tracker, metrics_store) = shared(dir.path());
        let orchestrator = PipelineOrchestrator::default();

        let result = orchestrator.execute(&config, tracker, metrics_store);
        assert!(result.is_err());
    }

    #[test]
    fn upload_hook_is_invoked_when_s3_output_file_configured() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), vec!["v1"]);
        config.s3_output_file = Some("s3://bucket/results.json".to_string());
        let (tracker, metrics_store) = shared(dir.path());

        let called = Arc::new(std::sync::Mutex::new(None));
        let called_clone = Arc::clone(&called);
        let hook: UploadHook = Arc::new(move |_path, remote| {
            *called_clone.lock().unwrap() = Some(remote.to_string());
            Ok(())
        });
        let orchestrator = PipelineOrchestrator::new(Some(hook));

        let ctx = orchestrator.execute(&config, tracker, metrics_store).unwrap();
        assert_eq!(ctx.s3_upload_success, Some(true));
        assert_eq!(*called.lock().unwrap(), Some("s3://bucket/results.json".to_string()));
    }

    #[test]
    fn missing_upload_hook_records_failure_without_failing_pipeline() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), vec!["v1"]);
        config.s3_output_file = Some("s3://bucket/results.json".to_string());
        let (tracker, metrics_store) = shared(dir.path());
        let orchestrator = PipelineOrchestrator::default();

        let ctx = orchestrator.execute(&config, tracker, metrics_store).unwrap();
        assert_eq!(ctx.s3_upload_success, Some(false));
        assert!(ctx.s3_upload_error.is_some());
    }
}
