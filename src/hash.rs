//! 64-bit string hashing for the duplicate filter.
//!
//! Prefix hashes are built from the doubling blocks `[0, 1)`, `[1, 2)`,
//! `[2, 4)`, ... of a string and combined by XOR, so that the hash of a
//! `2d`-byte prefix can be rolled forward from the stored hash of the
//! `d`-byte prefix without touching the first `d` bytes again.

use xxhash_rust::xxh64::xxh64;

/// The filter covers the full 64-bit hash space.
pub const FILTER_SIZE: u64 = u64::MAX;

/// Hash of a single block of bytes.
#[inline]
pub fn hash_block(bytes: &[u8]) -> u64 {
    xxh64(bytes, 0)
}

/// Combine a prior prefix hash with the hash of the extension bytes.
#[inline]
pub fn hash_extend(prior: u64, extension: &[u8]) -> u64 {
    prior ^ xxh64(extension, 0)
}

/// Hash of the `depth`-byte prefix, computed from scratch over the doubling
/// blocks. `depth` must be a power of two and `bytes.len() >= depth`.
pub fn hash_prefix(bytes: &[u8], depth: usize) -> u64 {
    debug_assert!(depth.is_power_of_two());
    debug_assert!(bytes.len() >= depth);

    let mut hash = hash_block(&bytes[..1]);
    let mut lower = 1;
    while lower < depth {
        hash = hash_extend(hash, &bytes[lower..2 * lower]);
        lower *= 2;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_hash_is_stable() {
        let a = hash_prefix(b"mississippi", 8);
        let b = hash_prefix(b"mississippi river", 8);
        assert_eq!(a, b);
        assert_ne!(a, hash_prefix(b"mississappi!", 8));
    }

    #[test]
    fn extension_rolls_forward() {
        let bytes = b"abcdefghijklmnop";
        let h4 = hash_prefix(bytes, 4);
        let h8 = hash_extend(h4, &bytes[4..8]);
        assert_eq!(h8, hash_prefix(bytes, 8));
    }

    #[test]
    fn depth_one() {
        assert_eq!(hash_prefix(b"x", 1), hash_block(b"x"));
    }
}
