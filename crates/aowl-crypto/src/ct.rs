//! Constant-time equality.
//!
//! Every byte is examined regardless of where the first difference sits.
//! Only a length mismatch returns early: lengths are fixed by construction
//! (hash outputs) and carry no secret.

use std::hint::black_box;

/// Byte-slice equality without an early exit on the first mismatch.
pub fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= black_box(x ^ y);
    }
    black_box(diff) == 0
}

/// Hex-string equality, case-insensitive, in constant time.
pub fn hex_eq(a: &str, b: &str) -> bool {
    bytes_eq(
        a.to_ascii_lowercase().as_bytes(),
        b.to_ascii_lowercase().as_bytes(),
    )
}

#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn equal_slices_compare_equal(data in prop::collection::vec(any::<u8>(), 0..256)) {
            prop_assert!(bytes_eq(&data, &data.clone()));
        }

        #[test]
        fn any_single_byte_difference_detected(
            data in prop::collection::vec(any::<u8>(), 1..256),
            pos in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut other = data.clone();
            let i = pos.index(data.len());
            other[i] ^= flip;
            prop_assert!(!bytes_eq(&data, &other));
        }
    }
}
