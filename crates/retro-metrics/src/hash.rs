//! Deterministic metric ids: `id = hash128(timestamp ++ metric_type ++ model)`, hex-encoded.
//!
//! Ported from `metrics_store.py::_generate_metric_id`'s `md5(f"{timestamp}_{metric_type}_{model}")`.
//! No MD5 crate is part of the teacher's or pack's stack, so this reuses `retro-store`'s own
//! double-seeded `FxHasher` 128-bit digest rather than pulling in a dedicated hashing dependency
//! for one call site. Same inputs always produce the same id, matching the original's dedup
//! behaviour for identical metrics.

use chrono::{DateTime, Utc};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

pub fn generate_metric_id(timestamp: DateTime<Utc>, metric_type: &str, model: Option<&str>) -> String {
    let id_base = format!("{}_{}_{}", timestamp.to_rfc3339(), metric_type, model.unwrap_or("unknown"));

    let mut low = FxHasher::default();
    0xA5A5_A5A5_u64.hash(&mut low);
    id_base.hash(&mut low);

    let mut high = FxHasher::default();
    0x5A5A_5A5A_u64.hash(&mut high);
    id_base.hash(&mut high);

    format!("{:016x}{:016x}", low.finish(), high.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let a = generate_metric_id(ts(), "retrodiction_batch", Some("m1"));
        let b = generate_metric_id(ts(), "retrodiction_batch", Some("m1"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_metric_types_produce_different_ids() {
        let a = generate_metric_id(ts(), "retrodiction_batch", Some("m1"));
        let b = generate_metric_id(ts(), "cost_tracking", Some("m1"));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_model_defaults_to_unknown() {
        let a = generate_metric_id(ts(), "retrodiction_batch", None);
        let b = generate_metric_id(ts(), "retrodiction_batch", Some("unknown"));
        assert_eq!(a, b);
    }

    #[test]
    fn id_is_32_hex_chars() {
        let id = generate_metric_id(ts(), "x", Some("y"));
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
