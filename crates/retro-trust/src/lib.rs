//! Bayesian trust tracking and lock-minimising update buffering.
//!
//! [`TrustTracker`] (C1) maintains a Beta(α,β) posterior per rule key. [`TrustUpdateBuffer`] (C2)
//! sits in front of a tracker and coalesces bursts of updates into batched flushes.

mod buffer;
mod tracker;

pub use buffer::{BufferStats, TrustUpdateBuffer};
pub use tracker::{PerformanceStats, TrustTracker};
