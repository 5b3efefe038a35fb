//! Batch planning and parallel coordination of a retrodiction training run (C6/C7).

mod batch;
mod coordinator;
mod worker;

pub use batch::{prepare_training_batches, BatchMetrics, TrainingBatch};
pub use coordinator::{
    BatchesSummary, CoordinatorConfig, ParallelCoordinator, PerformanceSummary, ProgressSnapshot,
    ResultsSummary, VariablesSummary, WorkerPoolInfo,
};
pub use worker::run_batch_task;
