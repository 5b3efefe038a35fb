//! Property tests over C1's update commutativity and C2's batching associativity.

use proptest::prelude::*;
use retro_core::TrustBufferConfig;
use retro_trust::{TrustTracker, TrustUpdateBuffer};
use std::sync::Arc;

const KEYS: &[&str] = &["rule_a", "rule_b", "rule_c"];

fn update_strategy() -> impl Strategy<Value = (usize, bool, f64)> {
    (0..KEYS.len(), any::<bool>(), 0.01f64..5.0)
}

proptest! {
    /// `batch_update`'s final `(α,β)` per key depends only on the multiset of updates, not their
    /// order — addition commutes, so a shuffled replay must land on the same posterior.
    #[test]
    fn batch_update_final_stats_are_order_independent(
        updates in prop::collection::vec(update_strategy(), 1..200),
        seed in any::<u64>(),
    ) {
        let original: Vec<(String, bool, f64)> = updates.iter().map(|(i, s, w)| (KEYS[*i].to_string(), *s, *w)).collect();
        let mut shuffled = original.clone();
        shuffle(&mut shuffled, seed);

        let original_tracker = TrustTracker::new();
        original_tracker.batch_update(&original);

        let shuffled_tracker = TrustTracker::new();
        shuffled_tracker.batch_update(&shuffled);

        for key in KEYS {
            prop_assert!(stats_approx_eq(original_tracker.get_stats(key), shuffled_tracker.get_stats(key)));
        }
    }

    /// Routing the same updates through the buffer in different chunk sizes, then flushing to
    /// drain whatever remains, must converge on the same posterior as applying them directly —
    /// the buffer only defers aggregation, it never changes the result.
    #[test]
    fn buffer_chunking_does_not_change_final_posterior(
        updates in prop::collection::vec(update_strategy(), 1..200),
        chunk_size in 1usize..12,
    ) {
        let direct = Arc::new(TrustTracker::new());
        let direct_updates: Vec<(String, bool, f64)> = updates.iter().map(|(i, s, w)| (KEYS[*i].to_string(), *s, *w)).collect();
        direct.batch_update(&direct_updates);

        let buffered_tracker = Arc::new(TrustTracker::new());
        let buffer = TrustUpdateBuffer::new(
            buffered_tracker.clone(),
            TrustBufferConfig { flush_threshold: usize::MAX, max_buffer_size: usize::MAX, auto_flush_interval_sec: 1.0e9 },
        );
        for chunk in direct_updates.chunks(chunk_size) {
            buffer.add_updates_batch(chunk);
        }
        buffer.flush();

        for key in KEYS {
            prop_assert!(stats_approx_eq(direct.get_stats(key), buffered_tracker.get_stats(key)));
        }
    }
}

/// Sums accumulated in a different order can differ in the last few bits of an `f64` without the
/// underlying computation being wrong; compare with a tolerance rather than bit-for-bit.
fn stats_approx_eq(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
}

/// Deterministic Fisher-Yates using a caller-supplied seed (no OS randomness in proptest bodies).
fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut state = seed.wrapping_add(0x9E3779B97F4A7C15);
    for i in (1..items.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        items.swap(i, j);
    }
}
