//! Deterministic shard routing via BLAKE3

use blake3::Hasher;

/// Shard index for a node id.
///
/// Stable across runs and platforms: BLAKE3 over the UTF-8 bytes, first
/// four bytes read as a little-endian u32, reduced modulo `shard_count`.
/// Changing this function orphans every existing `part_<i>.dat`.
///
/// # Examples
/// ```
/// use atlasdb::graph::shard_of;
///
/// let shard = shard_of("node_0", 16);
/// assert!(shard < 16);
/// assert_eq!(shard, shard_of("node_0", 16));
/// ```
pub fn shard_of(id: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    (route_hash(id) as usize) % shard_count.max(1)
}

pub fn route_hash(id: &str) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pinned_values() {
        // Known BLAKE3 digest of the empty input starts with af 13 49 b9
        assert_eq!(route_hash(""), u32::from_le_bytes([0xaf, 0x13, 0x49, 0xb9]));
    }

    #[test]
    fn test_spreads_across_shards() {
        let mut seen = [false; 16];
        for i in 0..200 {
            seen[shard_of(&format!("node_{}", i), 16)] = true;
        }
        assert!(seen.iter().all(|s| *s), "some shard never received a node");
    }

    #[test]
    fn test_single_shard() {
        assert_eq!(shard_of("anything", 1), 0);
    }

    proptest! {
        #[test]
        fn shard_is_deterministic_and_in_range(id in ".{0,40}", count in 1usize..64) {
            let a = shard_of(&id, count);
            prop_assert!(a < count);
            prop_assert_eq!(a, shard_of(&id, count));
        }
    }
}
