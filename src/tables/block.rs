use integer_encoding::FixedInt;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::SIZE_OF_U32_BYTES;
use crate::entry::decode_entry;
use crate::errors::MistDBError;
use crate::iterator::MistDbIterator;
use crate::key::InternalKey;

use super::errors::{ReadError, TableResult};

/// Reader for deserializing a data block from the table file and iterating its entries.
#[derive(Debug)]
pub(crate) struct BlockReader {
    /**
    The deserialized entries within a block.

    Tombstones are stored with an empty value.
    */
    block_entries: Vec<(InternalKey, Vec<u8>)>,
}

/// Crate-only methods
impl BlockReader {
    /**
    Create a new instance of a [`BlockReader`] from uncompressed block contents.

    Every entry is bounds checked against the offset table of the block. Entries must be stored in
    strictly increasing key order.
    */
    pub(crate) fn new(raw_data: &[u8]) -> TableResult<Self> {
        if raw_data.len() < SIZE_OF_U32_BYTES {
            return Err(ReadError::FailedToParse(
                "Failed to parse the block. The buffer is too small to hold the entry count."
                    .to_string(),
            ));
        }

        // The number of entries is in the last 4 bytes of the block when serialized.
        let num_entries_offset = raw_data.len() - SIZE_OF_U32_BYTES;
        let num_entries = u32::decode_fixed(&raw_data[num_entries_offset..]) as usize;

        // The array of offsets is right before the number of entries when serialized.
        let offsets_size = num_entries
            .checked_mul(SIZE_OF_U32_BYTES)
            .filter(|size| *size <= num_entries_offset)
            .ok_or_else(|| {
                ReadError::FailedToParse(format!(
                    "Failed to parse the block. It claims {} entries but is only {} bytes long.",
                    num_entries,
                    raw_data.len()
                ))
            })?;
        let entries_end = num_entries_offset - offsets_size;
        let entry_offsets: Vec<usize> = raw_data[entries_end..num_entries_offset]
            .chunks_exact(SIZE_OF_U32_BYTES)
            .map(|chunk| u32::decode_fixed(chunk) as usize)
            .collect();

        let mut block_entries: Vec<(InternalKey, Vec<u8>)> = Vec::with_capacity(num_entries);
        let mut expected_offset = 0;
        for entry_offset in entry_offsets {
            if entry_offset != expected_offset {
                return Err(ReadError::FailedToParse(format!(
                    "Failed to parse the block. An entry was expected at offset {} but the offset \
                    table lists {}.",
                    expected_offset, entry_offset
                )));
            }

            let (entry, bytes_read) = decode_entry(&raw_data[entry_offset..entries_end])
                .map_err(|err| ReadError::FailedToParse(err.to_string()))?;
            let (key, value) = entry.into_parts();
            if let Some((last_key, _)) = block_entries.last() {
                if last_key >= &key {
                    return Err(ReadError::FailedToParse(
                        "Failed to parse the block. The entries are not in sorted order."
                            .to_string(),
                    ));
                }
            }

            block_entries.push((key, value));
            expected_offset = entry_offset + bytes_read;
        }

        if expected_offset != entries_end {
            return Err(ReadError::FailedToParse(format!(
                "Failed to parse the block. There are {} unaccounted bytes after the last entry.",
                entries_end - expected_offset
            )));
        }

        Ok(Self { block_entries })
    }

    /// Get the first entry with a key at or after `target`.
    pub(crate) fn find(&self, target: &InternalKey) -> Option<(&InternalKey, &Vec<u8>)> {
        let index = self.seek_index(target)?;
        let (key, value) = &self.block_entries[index];

        Some((key, value))
    }

    /// Get a [`MistDbIterator`] over the block entries.
    pub(crate) fn iter(self: &Arc<Self>) -> BlockIter {
        BlockIter {
            block: Arc::clone(self),
            current_index: None,
        }
    }

    /// Binary search for the index of the first entry that is >= `target`.
    fn seek_index(&self, target: &InternalKey) -> Option<usize> {
        let index = self
            .block_entries
            .partition_point(|(key, _)| key.cmp(target) == Ordering::Less);

        if index < self.block_entries.len() {
            Some(index)
        } else {
            None
        }
    }
}

/// Iterator adapter used to maintain iteration state.
#[derive(Debug)]
pub(crate) struct BlockIter {
    /// The block being iterated.
    block: Arc<BlockReader>,

    /// The index to the current entry in the block entries. `None` if the iterator is invalid.
    current_index: Option<usize>,
}

impl MistDbIterator for BlockIter {
    type Key = InternalKey;
    type Error = MistDBError;

    fn is_valid(&self) -> bool {
        self.current_index.is_some()
    }

    fn seek(&mut self, target: &InternalKey) -> Result<(), MistDBError> {
        self.current_index = self.block.seek_index(target);

        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<(), MistDBError> {
        self.current_index = if self.block.block_entries.is_empty() {
            None
        } else {
            Some(0)
        };

        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<(), MistDBError> {
        self.current_index = self.block.block_entries.len().checked_sub(1);

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current_index = self
            .current_index
            .map(|index| index + 1)
            .filter(|index| *index < self.block.block_entries.len());

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current_index = self.current_index.and_then(|index| index.checked_sub(1));

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        let (key, value) = &self.block.block_entries[self.current_index?];
        Some((key, value))
    }
}
