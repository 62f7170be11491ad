//! The topic-name hash used to compute cluster ownership.
//!
//! `hash(name) = fold(md5(utf8(name)))`, where `fold` XOR-stripes the 16 MD5
//! bytes down to 4 by XORing group `i` (bytes `i*4 .. i*4+3`) together, then
//! reads the 4 result bytes as a signed big-endian `i32`. Every implementation
//! in the cluster (brokers and clients, in any language) must reproduce this
//! exactly, since `owner(name)` depends on it.

/// Number of XOR groups the 16-byte MD5 digest is folded into.
const GROUPS: usize = 4;
/// Width (in bytes) of each XOR group; `16 / GROUPS`.
const GROUP_WIDTH: usize = 16 / GROUPS;

/// Computes the stable, implementation-portable hash of a topic name.
pub fn hash_topic_name(name: &str) -> i32 {
    let digest = md5::compute(name.as_bytes());
    let mut folded = [0u8; GROUPS];
    for (i, slot) in folded.iter_mut().enumerate() {
        let start = i * GROUP_WIDTH;
        let mut acc = 0u8;
        for byte in &digest[start..start + GROUP_WIDTH] {
            acc ^= byte;
        }
        *slot = acc;
    }
    i32::from_be_bytes(folded)
}

/// Computes the index into `[peers..., self]` that owns `name`, given the
/// number of peers the leader currently knows about. Index `peers.len()`
/// means "the leader itself owns it".
///
/// `owner_index` is deterministic given only `name` and `peer_count`, so any
/// node that agrees on cluster membership computes the same answer
/// independently. Uses a truncating remainder wrapped in `abs`, not Euclidean
/// remainder -- the two disagree for negative hashes whenever `total` isn't a
/// power of two, and every implementation in the cluster must land on the
/// same index.
pub fn owner_index(name: &str, peer_count: usize) -> usize {
    let total = peer_count as i64 + 1;
    let h = hash_topic_name(name) as i64;
    (h % total).unsigned_abs() as usize
}
