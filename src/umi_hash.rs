//! UMI Hash - Deterministic per-read mutation roll
//!
//! Every read gets exactly one pseudo-random fraction in [0, 1) that is
//! compared against the allele fraction of each variant it overlaps. The
//! fraction is derived only from the read's grouping key, so reads (and mates)
//! sharing that key always receive the same decision for a given variant.
//!
//! # Hash
//! - X31 string hash (`h = h * 31 + c`, 32-bit wrapping)
//! - Thomas Wang 32-bit integer mix for avalanche
//! - Low 24 bits scaled to [0, 1)

/// Delimiter separating the grouping key from the rest of a read identifier
pub const UMI_DELIMITER: u8 = b'#';

const FRACTION_MASK: u32 = 0x00FF_FFFF;
const FRACTION_SCALE: f64 = 0x0100_0000 as f64;

/// Result of hashing one read identifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlleleRoll {
    /// Shared mutation roll in [0, 1)
    pub fraction: f64,
    /// Mixed 32-bit hash the fraction was taken from
    pub seed: u32,
}

/// Grouping key of a read identifier: everything before the first `#`,
/// or the whole identifier when there is no delimiter.
pub fn umi_key(identifier: &[u8]) -> &[u8] {
    match identifier.iter().position(|&b| b == UMI_DELIMITER) {
        Some(idx) => &identifier[..idx],
        None => identifier,
    }
}

/// X31 string hash over raw bytes.
///
/// The first byte seeds the accumulator; an empty key hashes to 0.
pub fn x31_hash(key: &[u8]) -> u32 {
    let Some((&first, rest)) = key.split_first() else {
        return 0;
    };
    rest.iter().fold(first as u32, |h, &c| {
        (h << 5).wrapping_sub(h).wrapping_add(c as u32)
    })
}

/// Thomas Wang's 32-bit integer hash.
pub fn wang_hash(mut key: u32) -> u32 {
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

/// Map a read identifier to its reproducible mutation roll.
///
/// # Arguments
/// * `identifier` - Read name, optionally of the form `<key>#<rest>`
///
/// # Returns
/// [`AlleleRoll`] with `fraction = (seed & 0xFFFFFF) / 0x1000000`
pub fn select_fraction(identifier: &[u8]) -> AlleleRoll {
    let seed = wang_hash(x31_hash(umi_key(identifier)));
    AlleleRoll {
        fraction: (seed & FRACTION_MASK) as f64 / FRACTION_SCALE,
        seed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_umi_key_splits_on_first_delimiter() {
        assert_eq!(umi_key(b"ACGTACGT#read17"), b"ACGTACGT");
        assert_eq!(umi_key(b"AAAA#x#y"), b"AAAA");
        assert_eq!(umi_key(b"no_delimiter"), b"no_delimiter");
        assert_eq!(umi_key(b"#leading"), b"");
    }

    #[test]
    fn test_x31_hash_known_values() {
        assert_eq!(x31_hash(b""), 0);
        assert_eq!(x31_hash(b"A"), 65);
        // 'A' * 31 + 'C'
        assert_eq!(x31_hash(b"AC"), 65 * 31 + 67);
        assert_eq!(x31_hash(b"ACG"), (65 * 31 + 67) * 31 + 71);
    }

    #[test]
    fn test_x31_hash_wraps_on_long_keys() {
        let key = vec![b'T'; 4096];
        // Must not panic on overflow
        let _ = x31_hash(&key);
    }

    #[test]
    fn test_wang_hash_is_stable() {
        assert_eq!(wang_hash(0), wang_hash(0));
        assert_ne!(wang_hash(1), wang_hash(2));
    }

    #[test]
    fn test_select_fraction_in_unit_interval() {
        for i in 0..10_000u32 {
            let name = format!("UMI{}#read{}", i, i * 7);
            let roll = select_fraction(name.as_bytes());
            assert!(roll.fraction >= 0.0 && roll.fraction < 1.0);
            assert_eq!(roll.fraction, (roll.seed & 0xFF_FFFF) as f64 / 16_777_216.0);
        }
    }

    #[test]
    fn test_select_fraction_groups_by_key() {
        let a = select_fraction(b"GATTACA#frag1/1");
        let b = select_fraction(b"GATTACA#frag2/2");
        let c = select_fraction(b"GATTACA");
        assert_eq!(a, b);
        assert_eq!(a, c);

        let other = select_fraction(b"CATTAGA#frag1/1");
        assert_ne!(a.seed, other.seed);
    }

    #[test]
    fn test_select_fraction_is_deterministic() {
        let first = select_fraction(b"read_0001");
        for _ in 0..100 {
            assert_eq!(select_fraction(b"read_0001"), first);
        }
    }

    #[test]
    fn test_select_fraction_roughly_uniform() {
        // 10 equal bins over 20k keys; each bin should be within 30% of expectation
        let mut bins = [0usize; 10];
        for i in 0..20_000u32 {
            let name = format!("umi_{:06}", i);
            let roll = select_fraction(name.as_bytes());
            bins[(roll.fraction * 10.0) as usize] += 1;
        }
        for count in bins {
            assert!(count > 1_400 && count < 2_600, "bin count {} out of range", count);
        }
    }
}
