//! Five-stage, rollback-capable orchestration of one retrodiction training run (C8).

mod context;
mod pipeline;
mod stage;
mod stages;

pub use context::{PipelineContext, UploadHook};
pub use pipeline::PipelineOrchestrator;
pub use stage::Stage;
pub use stages::{DataStoreSetupStage, DistributedSetupStage, EnvironmentSetupStage, ResultsUploadStage, TrainingExecutionStage};
