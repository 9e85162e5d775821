//! Key hashing and hash-space partitioning
//!
//! The key space is hashed onto the full signed 64-bit range, which is split
//! into contiguous shard ranges. A shard's boundary is the inclusive upper
//! bound of its range; the last boundary is always `i64::MAX` so the union of
//! ranges covers the space exactly once regardless of division truncation.

/// Hash a key onto the signed 64-bit domain.
///
/// BLAKE3 folded to 8 little-endian bytes; well distributed, not
/// cryptographic in purpose.
pub fn hash_key(key: &str) -> i64 {
    let hash = blake3::hash(key.as_bytes());
    i64::from_le_bytes(hash.as_bytes()[0..8].try_into().unwrap())
}

/// Hash-range span and step, computed in i128 to avoid overflow.
fn step_size(shard_count: u32) -> i128 {
    let span = i64::MAX as i128 - i64::MIN as i128;
    span / shard_count as i128
}

/// Shard id owning `hash` when the space is split into `shard_count` ranges.
///
/// Shard `i` owns `(boundary[i-1], boundary[i]]`; the first shard also owns
/// `i64::MIN`. Returns `None` for `shard_count == 0`.
pub fn shard_for_hash(hash: i64, shard_count: u32) -> Option<u32> {
    if shard_count == 0 {
        return None;
    }

    // The general formula degenerates for a single shard.
    if shard_count == 1 {
        return Some(0);
    }

    let step = step_size(shard_count);
    let offset = hash as i128 - i64::MIN as i128;

    let id = if offset == 0 {
        0
    } else {
        // Ranges are upper-inclusive, hence the -1.
        (offset - 1) / step
    };

    // Division truncation shortens the last computed range; the last shard
    // picks up the remainder.
    Some((id as u32).min(shard_count - 1))
}

/// Shard id owning `key`.
pub fn shard_for_key(key: &str, shard_count: u32) -> Option<u32> {
    shard_for_hash(hash_key(key), shard_count)
}

/// Split the hash space into `shard_count` contiguous ranges.
///
/// Returns the strictly increasing upper boundaries, one per shard; the last
/// is forced to `i64::MAX`.
pub fn partition(shard_count: u32) -> Vec<i64> {
    let mut boundaries = Vec::with_capacity(shard_count as usize);

    if shard_count == 0 {
        return boundaries;
    }

    let step = step_size(shard_count);

    for i in 1..=shard_count as i128 {
        let boundary = if i == shard_count as i128 {
            i64::MAX
        } else {
            (i64::MIN as i128 + i * step) as i64
        };

        boundaries.push(boundary);
    }

    boundaries
}
