//! 64-bit mixing used for board and position fingerprints.

/// Scramble a single 64-bit value.
#[inline]
pub fn hash(val: u64) -> u64 {
    0xfad0_d7f2_fbb0_59f1u64
        .wrapping_mul(val.wrapping_add(0xbaad_41cd_cb83_9961))
        .wrapping_add(
            0x7ace_c005_0bf8_2f43u64
                .wrapping_mul((val >> 31).wrapping_add(0xd571_b3a9_2b1b_2755)),
        )
}

/// Append a value to an existing hash.
#[inline]
pub fn hash_cat(h: u64, x: u64) -> u64 {
    h ^ 0x2997_99ad_f0d9_5defu64
        .wrapping_add(hash(x))
        .wrapping_add(h << 6)
        .wrapping_add(h >> 2)
}

/// Fold a sequence of 64-bit words into one concatenated hash.
pub fn hash_all(values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(0, hash_cat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(42), hash(42));
        assert_eq!(hash_cat(7, 42), hash_cat(7, 42));
    }

    #[test]
    fn test_hash_separates_nearby_inputs() {
        assert_ne!(hash(0), hash(1));
        assert_ne!(hash_cat(0, 1), hash_cat(1, 0));
    }

    #[test]
    fn test_hash_all_is_order_sensitive() {
        let a = hash_all([1, 2, 3]);
        let b = hash_all([3, 2, 1]);
        assert_ne!(a, b);
        assert_eq!(a, hash_all([1, 2, 3]));
    }

    #[test]
    fn test_hash_all_empty_is_zero_seed() {
        assert_eq!(hash_all(std::iter::empty()), 0);
    }
}
