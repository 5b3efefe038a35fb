//! Shared types, error model, and run configuration for the retrodiction-training coordinator.
//!
//! Every other crate in this workspace depends on `retro-core` for its [`Result`]/[`RetroError`]
//! alias, the [`RetroConfig`] family, and the small value types ([`RuleKey`], [`TrustHistoryPoint`])
//! shared between the trust tracker, the metrics/data stores, and the coordinator.

mod config;
mod error;
mod types;

pub use config::{DataStoreConfig, MetricsCollectorConfig, RetroConfig, TrustBufferConfig};
pub use error::{RetroError, Result};
pub use types::{push_bounded, RuleKey, TrustHistoryPoint, DEFAULT_MAX_HISTORY};
