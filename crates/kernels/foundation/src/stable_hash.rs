//! Stable hashing for key labels and addresses.
//!
//! Keys derived from labels and address paths must be a deterministic
//! consequence of their text on every platform and every run. These helpers
//! provide a stable FNV-1a 64-bit implementation for that purpose.
//!
//! NOTE: FNV-1a is **not** cryptographically secure.

/// 64-bit FNV-1a offset basis.
pub const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
/// 64-bit FNV-1a prime.
pub const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01B3;

/// Mix bytes into an existing FNV-1a 64-bit hash state.
///
/// For each byte, XOR it into the hash and multiply by the FNV prime.
#[inline]
pub const fn fnv1a64_mix(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0usize;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV1A_PRIME_64);
        i += 1;
    }
    hash
}

/// Hash an arbitrary byte slice with FNV-1a 64-bit.
#[inline]
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_mix(FNV1A_OFFSET_BASIS_64, bytes)
}

/// Hash a UTF-8 string with FNV-1a 64-bit.
#[inline]
pub const fn fnv1a64_str(s: &str) -> u64 {
    fnv1a64(s.as_bytes())
}

/// Hash an address path given as segments, inserting `/` between them.
///
/// `fnv1a64_address(&["outer", "x"]) == fnv1a64_str("outer/x")`.
pub fn fnv1a64_address<S: AsRef<str>>(segments: &[S]) -> u64 {
    let mut h = FNV1A_OFFSET_BASIS_64;
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            h = fnv1a64_mix(h, b"/");
        }
        h = fnv1a64_mix(h, segment.as_ref().as_bytes());
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    /// FNV-1a 64-bit reference values, checked step by step.
    #[test]
    fn fnv1a64_reference_values() {
        assert_eq!(fnv1a64(b""), FNV1A_OFFSET_BASIS_64);

        let expected_a = (FNV1A_OFFSET_BASIS_64 ^ 0x61).wrapping_mul(FNV1A_PRIME_64);
        assert_eq!(fnv1a64(b"a"), expected_a);

        let expected_ab = ((FNV1A_OFFSET_BASIS_64 ^ 0x61).wrapping_mul(FNV1A_PRIME_64) ^ 0x62)
            .wrapping_mul(FNV1A_PRIME_64);
        assert_eq!(fnv1a64(b"ab"), expected_ab);
    }

    /// If these fail, the hash algorithm has changed and seeded replays break.
    #[test]
    fn fnv1a64_regression_values() {
        assert_eq!(fnv1a64(b"hello"), 11831194018420276491);
        assert_eq!(fnv1a64(b"hello world"), 8618312879776256743);
    }

    #[test]
    fn fnv1a64_mix_incremental() {
        let full = fnv1a64(b"helloworld");
        let incremental = fnv1a64_mix(fnv1a64_mix(FNV1A_OFFSET_BASIS_64, b"hello"), b"world");
        assert_eq!(full, incremental);
    }

    #[test]
    fn address_hash_joins_with_slashes() {
        assert_eq!(fnv1a64_address(&["x"]), fnv1a64_str("x"));
        assert_eq!(fnv1a64_address(&["outer", "x"]), fnv1a64_str("outer/x"));
        assert_eq!(fnv1a64_address::<&str>(&[]), fnv1a64_str(""));
        assert_ne!(fnv1a64_address(&["a", "b"]), fnv1a64_address(&["ab"]));
    }
}
