//! Nonce sequencing shared by both directions.
//!
//! The nonce is a big-endian unsigned integer of whatever length the session
//! was created with. Persisted streams are only decryptable with exactly this
//! arithmetic, so it must never change.

/// Add one to `nonce` in place, carrying from the last byte leftward.
///
/// Returns `true` when every byte wrapped to zero. The wrap is not an error
/// here: the sequence simply continues from zero.
pub fn increment(nonce: &mut [u8]) -> bool {
    for byte in nonce.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            return false;
        }
    }
    true
}

/// Nonce of chunk `index`: `base + index`, wrapping at the width of `base`.
///
/// Equivalent to calling [`increment`] `index` times.
pub fn nth(base: &[u8], index: u64) -> Vec<u8> {
    let mut nonce = base.to_vec();
    let mut carry = index as u128;
    for byte in nonce.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = *byte as u128 + (carry & 0xff);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn increments_last_byte() {
        let mut n = [0u8; 12];
        assert!(!increment(&mut n));
        assert_eq!(n[11], 1);
        assert!(n[..11].iter().all(|&b| b == 0));
    }

    #[test]
    fn carries_across_byte_boundary() {
        let mut n = [0u8; 12];
        n[11] = 0xff;
        assert!(!increment(&mut n));
        assert_eq!(&n[10..], &[0x01, 0x00]);

        let mut n = [0u8; 12];
        n[9..].copy_from_slice(&[0x00, 0xff, 0xff]);
        increment(&mut n);
        assert_eq!(&n[9..], &[0x01, 0x00, 0x00]);
    }

    #[test]
    fn wraps_to_zero_on_overflow() {
        let mut n = [0xffu8; 12];
        assert!(increment(&mut n));
        assert_eq!(n, [0u8; 12]);
        assert!(!increment(&mut n));
        assert_eq!(n[11], 1);
    }

    #[test]
    fn nth_matches_known_values() {
        let base = [0u8; 12];
        assert_eq!(nth(&base, 0), base.to_vec());
        assert_eq!(nth(&base, 256)[10..], [0x01, 0x00]);

        let mut base = [0u8; 12];
        base[11] = 0xfe;
        assert_eq!(nth(&base, 3)[10..], [0x01, 0x01]);

        assert_eq!(nth(&[0xff; 12], 1), vec![0u8; 12]);
    }

    #[test]
    fn nth_on_odd_width() {
        let base = [0xffu8; 17];
        let mut expected = vec![0u8; 17];
        expected[16] = 4;
        assert_eq!(nth(&base, 5), expected);
    }

    proptest! {
        #[test]
        fn nth_equals_repeated_increment(
            base in proptest::collection::vec(any::<u8>(), 12..=16),
            steps in 0u64..600,
        ) {
            let mut walked = base.clone();
            for _ in 0..steps {
                increment(&mut walked);
            }
            prop_assert_eq!(nth(&base, steps), walked);
        }

        #[test]
        fn nth_is_additive(
            base in proptest::collection::vec(any::<u8>(), 12..=12),
            a in any::<u32>(),
            b in any::<u32>(),
        ) {
            let stepped = nth(&nth(&base, a as u64), b as u64);
            prop_assert_eq!(stepped, nth(&base, a as u64 + b as u64));
        }
    }
}
