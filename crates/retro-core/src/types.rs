//! Shared value types used across the trust, metrics, store, and coordinator crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier naming the subject of a trust estimate: a rule, a variable, or a model.
pub type RuleKey = String;

/// A single `(timestamp, trust-mean)` entry in a rule's bounded history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrustHistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub mean: f64,
}

/// Default cap on the number of history entries retained per rule (`H_max`).
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Appends `point` to `history`, evicting the oldest entry if doing so would exceed `max_history`.
///
/// O(1) amortized append; O(max_history) worst case truncation, matching the design note's
/// requirement to avoid numpy-array-style reallocation on every update.
pub fn push_bounded(history: &mut Vec<TrustHistoryPoint>, point: TrustHistoryPoint, max_history: usize) {
    if max_history == 0 {
        return;
    }
    history.push(point);
    if history.len() > max_history {
        let overflow = history.len() - max_history;
        history.drain(0..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(n: i64, mean: f64) -> TrustHistoryPoint {
        TrustHistoryPoint {
            timestamp: DateTime::from_timestamp(n, 0).unwrap(),
            mean,
        }
    }

    #[test]
    fn push_bounded_keeps_most_recent() {
        let mut h = Vec::new();
        for i in 0..5 {
            push_bounded(&mut h, pt(i, i as f64), 3);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.first().unwrap().timestamp, pt(2, 0.0).timestamp);
        assert_eq!(h.last().unwrap().timestamp, pt(4, 0.0).timestamp);
    }

    #[test]
    fn push_bounded_under_cap_keeps_all() {
        let mut h = Vec::new();
        push_bounded(&mut h, pt(0, 0.1), 100);
        push_bounded(&mut h, pt(1, 0.2), 100);
        assert_eq!(h.len(), 2);
    }
}
