use integer_encoding::VarInt;

use super::errors::{ReadError, TableResult};

/// Upper bound on an encoded [`BlockHandle`]: two varint64 values of at most 10 bytes each.
pub(crate) const BLOCK_HANDLE_MAX_ENCODED_LENGTH_BYTES: usize = 10 + 10;

/**
Locates a block within a table file.

Encoded as the varint64 offset followed by the varint64 size. The size excludes the trailer
(compression type and checksum) stored after every block.
*/
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockHandle {
    offset: u64,
    size: u64,
}

/// Crate-only methods
impl BlockHandle {
    pub(crate) fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the offset to the block this handle is for.
    pub(crate) fn get_offset(&self) -> u64 {
        self.offset
    }

    /// Get the size of the block this handle is for.
    pub(crate) fn get_size(&self) -> u64 {
        self.size
    }

    /// Decode a handle from the front of `buf`. Also returns the number of bytes consumed.
    pub(crate) fn deserialize(buf: &[u8]) -> TableResult<(BlockHandle, usize)> {
        let truncated =
            |field: &str| ReadError::FailedToParse(format!("Block handle {} is truncated.", field));

        let (offset, offset_length) = u64::decode_var(buf).ok_or_else(|| truncated("offset"))?;
        let (size, size_length) =
            u64::decode_var(&buf[offset_length..]).ok_or_else(|| truncated("size"))?;

        Ok((BlockHandle::new(offset, size), offset_length + size_length))
    }
}

impl From<&BlockHandle> for Vec<u8> {
    fn from(value: &BlockHandle) -> Vec<u8> {
        let mut encoded = value.offset.encode_var_vec();
        encoded.extend(value.size.encode_var_vec());
        encoded
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn block_handles_report_the_bytes_they_occupy() {
        let handle = BlockHandle::new(300, u64::MAX);
        let mut serialized = Vec::<u8>::from(&handle);
        assert!(serialized.len() <= BLOCK_HANDLE_MAX_ENCODED_LENGTH_BYTES);
        serialized.extend_from_slice(b"trailing");

        let (deserialized, bytes_read) = BlockHandle::deserialize(&serialized).unwrap();
        assert_eq!(deserialized.get_offset(), 300);
        assert_eq!(deserialized.get_size(), u64::MAX);
        assert_eq!(&serialized[bytes_read..], b"trailing");
    }

    #[test]
    fn deserializing_an_empty_buffer_fails() {
        assert!(BlockHandle::deserialize(&[]).is_err());
    }
}
