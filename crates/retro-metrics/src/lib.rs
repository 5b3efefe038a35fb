//! Metrics persistence (C3) and non-blocking collection (C4).

mod collector;
mod hash;
mod store;
mod types;

pub use collector::{AsyncMetricsCollector, BackpressureError, CollectorStats};
pub use store::{MetricsStore, MetricsStoreConfig};
pub use types::{CostStatus, CostTracking, MetricQuery, MetricRecord};
