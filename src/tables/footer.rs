use integer_encoding::{FixedInt, VarInt};
use std::convert::TryFrom;

use super::block_handle::{BlockHandle, BLOCK_HANDLE_MAX_ENCODED_LENGTH_BYTES};
use super::errors::{ReadError, TableResult};

/**
The fixed size of a footer.

Refer to the [`Footer`] documentation for how this number is calculated.
*/
pub(crate) const SIZE_OF_FOOTER_BYTES: usize = 48;

/// The number of bytes in front of the magic number.
const SIZE_OF_FOOTER_BODY_BYTES: usize = SIZE_OF_FOOTER_BYTES - 8;

/// Trailing marker identifying a MistDB table file. The bytes spell `mistdbtb`.
const TABLE_MAGIC_NUMBER: u64 = 0x6d69_7374_6462_7462;

/**
The footer of a table file.

A table file's footer consists of the following parts:
- A block handle for the index (at most 20 bytes)
- The number of entries in the table as a varint64 (at most 10 bytes)
- A masked CRC32C of every byte of the file in front of the footer (4 bytes)
- Zeroed bytes to pad the parts above to 40 bytes and make the footer a fixed length
- 8-byte `TABLE_MAGIC_NUMBER`
*/
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Footer {
    /// Handle to the index block.
    index_handle: BlockHandle,

    /// The total number of entries in the table.
    num_entries: u64,

    /// The masked checksum of the table contents preceding the footer.
    masked_file_checksum: u32,
}

/// Crate-only methods
impl Footer {
    /// Create a new instance of [`Footer`].
    pub(crate) fn new(index_handle: BlockHandle, num_entries: u64, masked_file_checksum: u32) -> Self {
        Self {
            index_handle,
            num_entries,
            masked_file_checksum,
        }
    }

    /// Get the handle to the index block.
    pub(crate) fn get_index_handle(&self) -> &BlockHandle {
        &self.index_handle
    }

    /// Get the number of entries in the table.
    pub(crate) fn get_num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Get the masked checksum of the table contents preceding the footer.
    pub(crate) fn get_masked_file_checksum(&self) -> u32 {
        self.masked_file_checksum
    }
}

impl TryFrom<&[u8]> for Footer {
    type Error = ReadError;

    fn try_from(value: &[u8]) -> TableResult<Footer> {
        if value.len() != SIZE_OF_FOOTER_BYTES {
            return Err(ReadError::FailedToParse(
                "The length of the buffer was not equal to the fixed size of a footer.".to_string(),
            ));
        }

        let magic_number = u64::decode_fixed(&value[SIZE_OF_FOOTER_BODY_BYTES..]);
        if magic_number != TABLE_MAGIC_NUMBER {
            return Err(ReadError::FailedToParse(
                "The magic number was incorrect. This is not a table file.".to_string(),
            ));
        }

        let body = &value[..SIZE_OF_FOOTER_BODY_BYTES];
        let (index_handle, handle_length) = BlockHandle::deserialize(body)?;
        let (num_entries, num_entries_length) = u64::decode_var(&body[handle_length..])
            .ok_or_else(|| {
                ReadError::FailedToParse(
                    "Failed to deserialize the number of entries in the footer.".to_string(),
                )
            })?;

        let checksum_offset = handle_length + num_entries_length;
        if checksum_offset + 4 > body.len() {
            return Err(ReadError::FailedToParse(
                "The footer body overflowed into the magic number.".to_string(),
            ));
        }
        let masked_file_checksum = u32::decode_fixed(&body[checksum_offset..checksum_offset + 4]);

        Ok(Footer::new(index_handle, num_entries, masked_file_checksum))
    }
}

impl TryFrom<&Footer> for Vec<u8> {
    type Error = ReadError;

    fn try_from(value: &Footer) -> TableResult<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::with_capacity(SIZE_OF_FOOTER_BYTES);
        buf.extend(Vec::<u8>::from(&value.index_handle));
        buf.extend(value.num_entries.encode_var_vec());
        buf.extend(value.masked_file_checksum.encode_fixed_vec());

        if buf.len() > SIZE_OF_FOOTER_BODY_BYTES {
            return Err(ReadError::FooterSerialization(buf.len()));
        }

        buf.resize(SIZE_OF_FOOTER_BODY_BYTES, 0);
        buf.extend(TABLE_MAGIC_NUMBER.encode_fixed_vec());

        if buf.len() != SIZE_OF_FOOTER_BYTES {
            return Err(ReadError::FooterSerialization(buf.len()));
        }

        Ok(buf)
    }
}

// The largest possible body has to fit in front of the magic number.
const _: () = assert!(BLOCK_HANDLE_MAX_ENCODED_LENGTH_BYTES + 10 + 4 <= SIZE_OF_FOOTER_BODY_BYTES);
