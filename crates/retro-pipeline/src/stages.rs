//! The five concrete pipeline stages, grounded on
//! `examples/original_source/recursive_training/stages/training_stages.py`.

use crate::context::PipelineContext;
use crate::stage::Stage;

use retro_coordinator::{CoordinatorConfig, ParallelCoordinator};
use retro_core::{RetroConfig, RetroError, Result};
use retro_store::DataStore;

use chrono::{NaiveDate, TimeZone, Utc};
use std::fs;
use std::sync::Arc;

/// S1 — environment/logging setup. Cannot be rolled back (nothing acquired).
pub struct EnvironmentSetupStage;

impl Stage for EnvironmentSetupStage {
    fn name(&self) -> &'static str {
        "EnvironmentSetupStage"
    }

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()> {
        tracing::info!(target: "retro::pipeline", "setting up training environment");
        fs::create_dir_all(&config.log_dir)?;

        ctx.is_aws_batch = config.is_batch_job();
        if ctx.is_aws_batch {
            if let Ok(job_id) = std::env::var("AWS_BATCH_JOB_ID") {
                tracing::info!(target: "retro::pipeline", job_id = %job_id, "running in AWS Batch job");
                ctx.environment_config.insert("aws_region".to_string(), config.aws_region.clone());
                ctx.environment_config.insert("output_path".to_string(), format!("batch_jobs/{job_id}/"));
            }
        }
        tracing::info!(target: "retro::pipeline", "environment setup completed");
        Ok(())
    }

    fn can_rollback(&self) -> bool {
        false
    }
}

/// S2 — opens the content-addressed data store (C5). Rollback releases the handle.
pub struct DataStoreSetupStage;

impl Stage for DataStoreSetupStage {
    fn name(&self) -> &'static str {
        "DataStoreSetupStage"
    }

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()> {
        tracing::info!(target: "retro::pipeline", "setting up data store");
        if config.s3_data_bucket.is_some() {
            tracing::warn!(
                target: "retro::pipeline",
                "s3_data_bucket configured but this repo has no remote-object-storage client; using the local content-addressed store"
            );
        }
        let store = DataStore::open(config.data_store.clone())?;
        ctx.data_store = Some(Arc::new(store));
        Ok(())
    }

    fn can_rollback(&self) -> bool {
        true
    }

    fn rollback(&self, _config: &RetroConfig, ctx: &mut PipelineContext) {
        if ctx.data_store.take().is_some() {
            tracing::info!(target: "retro::pipeline", "data store handle released");
        }
    }
}

/// S3 — brings up the in-process worker-pool runtime (C7's realisation of the distributed
/// backend). Rollback stops any in-flight training.
pub struct DistributedSetupStage;

impl Stage for DistributedSetupStage {
    fn name(&self) -> &'static str {
        "DistributedSetupStage"
    }

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()> {
        if !config.use_worker_pool {
            tracing::info!(target: "retro::pipeline", "worker pool not enabled, running single-threaded");
        } else {
            tracing::info!(target: "retro::pipeline", "setting up worker pool");
        }

        let coordinator_config = CoordinatorConfig {
            max_workers: config.max_workers.unwrap_or(1).max(1),
            threads_per_worker: config.threads_per_worker,
            dashboard_port: Some(config.dashboard_port),
            pool_enabled: config.use_worker_pool,
            external_cancel: ctx.external_cancel.clone(),
            trust_buffer: config.trust_buffer.clone(),
            metrics_collector: config.metrics_collector.clone(),
            data_store: config.data_store.clone(),
        };
        let coordinator = ParallelCoordinator::new(coordinator_config, Arc::clone(&ctx.tracker), Arc::clone(&ctx.metrics_store));
        ctx.coordinator = Some(Arc::new(coordinator));
        Ok(())
    }

    fn can_rollback(&self) -> bool {
        true
    }

    fn rollback(&self, _config: &RetroConfig, ctx: &mut PipelineContext) {
        if let Some(coordinator) = &ctx.coordinator {
            tracing::info!(target: "retro::pipeline", "shutting down worker pool");
            coordinator.stop_training();
        }
    }
}

/// S4 — runs the parallel training loop. Never rolled back: once batches have executed, there is
/// nothing to undo.
pub struct TrainingExecutionStage;

impl Stage for TrainingExecutionStage {
    fn name(&self) -> &'static str {
        "TrainingExecutionStage"
    }

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()> {
        tracing::info!(target: "retro::pipeline", "starting training execution");

        let start = NaiveDate::parse_from_str(&config.start_date, "%Y-%m-%d")
            .map_err(|_| RetroError::invalid_input("invalid start_date"))?
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| RetroError::invalid_input("invalid start_date"))?;
        let end = match &config.end_date {
            Some(end_date) => NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
                .map_err(|_| RetroError::invalid_input("invalid end_date"))?
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| RetroError::invalid_input("invalid end_date"))?,
            None => Utc::now(),
        };

        tracing::info!(target: "retro::pipeline", ?start, ?end, variables = ?config.variables, "training period");

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let output_file = config
            .output_file
            .clone()
            .or_else(|| if ctx.is_aws_batch { config.aws_batch_output_path(&timestamp) } else { None })
            .unwrap_or_else(|| format!("results/training_results_{timestamp}.json"));

        let coordinator = ctx
            .coordinator
            .clone()
            .ok_or_else(|| RetroError::invalid_input("distributed setup stage did not run"))?;

        let outcome = (|| -> Result<_> {
            coordinator.prepare_training_batches(
                &config.variables,
                start,
                end,
                config.batch_size_days as i64,
                config.overlap_days as i64,
                config.batch_limit,
            )?;
            coordinator.start_training(None)
        })();

        match outcome {
            Ok(summary) => {
                if let Some(parent) = std::path::Path::new(&output_file).parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&output_file, serde_json::to_vec_pretty(&summary)?)?;

                ctx.training_results = Some(summary);
                ctx.output_file = Some(output_file);
                ctx.training_success = true;
                tracing::info!(target: "retro::pipeline", "training execution completed successfully");
                Ok(())
            }
            Err(e) => {
                ctx.output_file = Some(output_file);
                ctx.training_success = false;
                ctx.training_error = Some(e.to_string());
                tracing::error!(target: "retro::pipeline", error = %e, "training execution failed");
                Err(e)
            }
        }
    }

    fn can_rollback(&self) -> bool {
        false
    }
}

/// S5 — uploads results via an injected [`crate::context::UploadHook`] if configured. Upload
/// failures are recorded but never fail the pipeline (§7 policy for `UploadFailure`).
pub struct ResultsUploadStage;

impl Stage for ResultsUploadStage {
    fn name(&self) -> &'static str {
        "ResultsUploadStage"
    }

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()> {
        if !ctx.training_success {
            tracing::warn!(target: "retro::pipeline", "skipping results upload due to training failure");
            return Ok(());
        }
        let Some(output_file) = ctx.output_file.clone() else {
            tracing::warn!(target: "retro::pipeline", "no output file to upload");
            return Ok(());
        };
        if !std::path::Path::new(&output_file).exists() {
            tracing::warn!(target: "retro::pipeline", "no output file to upload");
            return Ok(());
        }

        let should_upload = config.s3_output_file.is_some() || (ctx.is_aws_batch && config.s3_results_bucket.is_some());
        if !should_upload {
            tracing::info!(target: "retro::pipeline", "remote upload not configured, skipping");
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let Some(remote_path) = config.s3_output_path(&timestamp) else {
            tracing::warn!(target: "retro::pipeline", "could not determine remote output path");
            return Ok(());
        };

        match &ctx.upload_hook {
            Some(hook) => match hook(std::path::Path::new(&output_file), &remote_path) {
                Ok(()) => {
                    tracing::info!(target: "retro::pipeline", path = %remote_path, "results uploaded");
                    ctx.s3_upload_success = Some(true);
                    ctx.s3_upload_path = Some(remote_path);
                }
                Err(e) => {
                    tracing::error!(target: "retro::pipeline", error = %e, "results upload failed");
                    ctx.s3_upload_success = Some(false);
                    ctx.s3_upload_error = Some(e.to_string());
                }
            },
            None => {
                tracing::warn!(target: "retro::pipeline", "remote upload requested but no upload hook is configured");
                ctx.s3_upload_success = Some(false);
                ctx.s3_upload_error = Some("no upload hook configured".to_string());
            }
        }

        Ok(())
    }

    fn can_rollback(&self) -> bool {
        false
    }

    fn rollback(&self, _config: &RetroConfig, ctx: &mut PipelineContext) {
        if ctx.s3_upload_success == Some(true) {
            tracing::info!(target: "retro::pipeline", "results upload rollback not implemented; manual cleanup may be required");
        }
    }
}
