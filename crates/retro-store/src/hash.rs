//! Content-addressing: `id = hash128(serialize(P) ++ json_canonical(M))`, hex-encoded.
//!
//! No 128-bit hash crate is part of the teacher's or pack's stack, so this combines two
//! differently-seeded `rustc_hash::FxHasher` passes (the teacher's own hasher, already used for its
//! in-memory maps) into a 128-bit digest rather than pulling in a dedicated hashing dependency for
//! one call site.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

pub fn content_id(payload_bytes: &[u8], metadata_canonical: &[u8]) -> String {
    let mut low = FxHasher::default();
    0xA5A5_A5A5_u64.hash(&mut low);
    payload_bytes.hash(&mut low);
    metadata_canonical.hash(&mut low);

    let mut high = FxHasher::default();
    0x5A5A_5A5A_u64.hash(&mut high);
    metadata_canonical.hash(&mut high);
    payload_bytes.hash(&mut high);

    format!("{:016x}{:016x}", low.finish(), high.finish())
}
