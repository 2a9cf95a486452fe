//! Contains constants that are common across table operations.

/**
The size of a block descriptor in bytes.

This is a 1-byte enum + a 32-bit CRC (4 bytes).
*/
pub(crate) const BLOCK_DESCRIPTOR_SIZE_BYTES: usize = 1 + 4;

/**
The fraction of a block that compression has to save for the compressed form to be stored.

Blocks are stored raw if compression saves less than 12.5% (1/8).
*/
pub(crate) const MIN_COMPRESSION_SAVINGS_DIVISOR: usize = 8;
