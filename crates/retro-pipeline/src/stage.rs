//! Command-pattern stage trait, grounded on `crates/engine/src/database/builder.rs`'s fluent,
//! single-purpose step style generalised into a trait object so stages can be stored in a `Vec`.

use crate::context::PipelineContext;
use retro_core::{RetroConfig, Result};

/// One step of the training pipeline. `execute` mutates the shared context; `rollback` undoes (or
/// releases) whatever resources this stage acquired and must be safe to call more than once —
/// the orchestrator calls it once on the failure path and once more during unconditional cleanup.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, config: &RetroConfig, ctx: &mut PipelineContext) -> Result<()>;

    fn can_rollback(&self) -> bool;

    fn rollback(&self, _config: &RetroConfig, _ctx: &mut PipelineContext) {
        if self.can_rollback() {
            tracing::warn!(target: "retro::pipeline", stage = self.name(), "rollback not implemented");
        }
    }
}
