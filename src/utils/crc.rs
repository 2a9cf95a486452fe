//! Checksums protecting log records, table blocks and whole table files.

use crc::{Crc, CRC_32_ISCSI};

/**
CRC32C calculator.

This is a `static` so that streaming digests can borrow it for the `'static` lifetime.
*/
pub(crate) static CRC_CALCULATOR: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Added to a rotated checksum when masking.
const MASK_DELTA: u32 = 0xa282_ead8;

/// Calculate the checksum of the concatenation of `parts`.
pub(crate) fn checksum_of_parts(parts: &[&[u8]]) -> u32 {
    let mut digest = CRC_CALCULATOR.digest();
    for part in parts {
        digest.update(part);
    }

    digest.finalize()
}

/**
Mask a checksum before it is stored.

The checksum of data that embeds checksums is weak, so stored checksums are rotated and offset.
*/
pub(crate) fn mask_checksum(checksum: u32) -> u32 {
    checksum.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Recover a checksum masked by [`mask_checksum`].
pub(crate) fn unmask_checksum(masked_checksum: u32) -> u32 {
    masked_checksum.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Returns true if `masked_checksum` is the masked checksum of the concatenation of `parts`.
pub(crate) fn matches_masked_checksum(masked_checksum: u32, parts: &[&[u8]]) -> bool {
    unmask_checksum(masked_checksum) == checksum_of_parts(parts)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::{assert_eq, assert_ne};

    use super::*;

    #[test]
    fn masked_checksums_differ_from_the_raw_checksum_and_can_be_unmasked() {
        let checksum = CRC_CALCULATOR.checksum(b"batmann");

        assert_ne!(checksum, mask_checksum(checksum));
        assert_ne!(checksum, mask_checksum(mask_checksum(checksum)));
        for value in [checksum, u32::MAX, 0x8000_0000, 0] {
            assert_eq!(value, unmask_checksum(mask_checksum(value)));
        }
    }

    #[test]
    fn checksums_of_parts_match_the_checksum_of_the_joined_parts() {
        let checksum = checksum_of_parts(&[b"robin", b"", b"lab"]);

        assert_eq!(checksum, CRC_CALCULATOR.checksum(b"robinlab"));
        assert!(matches_masked_checksum(
            mask_checksum(checksum),
            &[b"robin", b"lab"]
        ));
        assert!(!matches_masked_checksum(checksum, &[b"robin", b"lab"]));
    }
}
