use crc::Digest;
use integer_encoding::FixedInt;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::TableFileCompressionType;
use crate::fs::{FileSystem, RandomAccessFile};
use crate::key::InternalKey;
use crate::utils::crc::{checksum_of_parts, mask_checksum, CRC_CALCULATOR};
use crate::utils::io::WriteHelpers;
use crate::DbOptions;

use super::block_handle::BlockHandle;
use super::constants::{BLOCK_DESCRIPTOR_SIZE_BYTES, MIN_COMPRESSION_SAVINGS_DIVISOR};
use super::errors::{BuilderError, TableBuildResult};
use super::footer::Footer;
use super::BlockBuilder;

/**
Builds and outputs a table file (an immutable and sorted map from keys to values).

# Format

A table file has the following format:

1. A series of data blocks
1. An index block that provides the first key and the location of every data block
1. A fixed-length footer providing the offset to the index block, the number of entries in the
   table, and a checksum of all of the bytes preceding the footer

Every block is followed by a 5 byte descriptor holding the compression type of the block and a
masked checksum of the stored block contents and compression type.
*/
pub(crate) struct TableBuilder {
    /// The compression to attempt for data blocks.
    compression: TableFileCompressionType,

    /// The approximate size of uncompressed data to pack into a data block.
    max_block_size: usize,

    /**
    Set to true when the file contents have been finalized or when abandoning the table
    generation.
    */
    file_closed: bool,

    /// The physical table file that is being written to.
    file: Box<dyn RandomAccessFile>,

    /// The file number that is being used to identify this file.
    file_number: u64,

    /// The current offset in the file where data is being appended.
    current_offset: u64,

    /// A running checksum over every byte written to the file.
    file_digest: Digest<'static, u32>,

    /// A block builder for data entries.
    data_block_builder: BlockBuilder,

    /// The first key of the data block currently being built.
    maybe_block_first_key: Option<InternalKey>,

    /// The serialized index entries for every data block written so far.
    index_block: Vec<u8>,

    /// The current number of entries that have been added to the table.
    num_entries: u64,

    /// The last key that was added to the table.
    maybe_last_key_added: Option<InternalKey>,
}

/// Crate-only methods
impl TableBuilder {
    /// Create a new instance of [`TableBuilder`] writing to a new file at `table_path`.
    pub(crate) fn new<P: AsRef<Path>>(
        options: &DbOptions,
        fs: Arc<dyn FileSystem>,
        table_path: P,
        file_number: u64,
    ) -> TableBuildResult<Self> {
        let file = fs.create_file(table_path.as_ref(), false)?;

        Ok(Self {
            compression: options.compression,
            max_block_size: options.max_block_size,
            file_closed: false,
            file,
            file_number,
            current_offset: 0,
            file_digest: CRC_CALCULATOR.digest(),
            data_block_builder: BlockBuilder::new(),
            maybe_block_first_key: None,
            index_block: vec![],
            num_entries: 0,
            maybe_last_key_added: None,
        })
    }

    /**
    Add a key-value pair to the table being constructed.

    # Errors

    Fails if the builder was already closed or if `key` is not strictly larger than every key added
    before it.
    */
    pub(crate) fn add_entry(&mut self, key: &InternalKey, value: &[u8]) -> TableBuildResult<()> {
        if self.file_closed {
            return Err(BuilderError::AlreadyClosed);
        }

        if self
            .maybe_last_key_added
            .as_ref()
            .map_or(false, |last_key| last_key >= key)
        {
            return Err(BuilderError::OutOfOrder);
        }

        if self.data_block_builder.approximate_size() >= self.max_block_size {
            self.write_data_block()?;
        }

        if self.maybe_block_first_key.is_none() {
            self.maybe_block_first_key = Some(key.clone());
        }

        self.maybe_last_key_added = Some(key.clone());
        self.num_entries += 1;
        self.data_block_builder.add_entry(key, value);

        Ok(())
    }

    /**
    Finish building the table. Flushes all pending blocks to disk, adds final metadata and syncs the
    file to the storage medium.
    */
    pub(crate) fn finalize(&mut self) -> TableBuildResult<()> {
        if self.file_closed {
            return Err(BuilderError::AlreadyClosed);
        }

        // Flush pending data to disk
        self.write_data_block()?;
        self.file_closed = true;

        // Write the index block
        let index_offset = self.current_offset;
        let index_contents = std::mem::take(&mut self.index_block);
        self.emit_block_to_disk(&index_contents, TableFileCompressionType::None)?;
        let index_handle = BlockHandle::new(index_offset, index_contents.len() as u64);

        // Write the footer
        let file_checksum = std::mem::replace(&mut self.file_digest, CRC_CALCULATOR.digest())
            .finalize();
        let footer = Footer::new(index_handle, self.num_entries, mask_checksum(file_checksum));
        let serialized_footer =
            Vec::<u8>::try_from(&footer).map_err(BuilderError::FooterSerialization)?;
        self.file.write_all(&serialized_footer)?;
        self.current_offset += serialized_footer.len() as u64;
        self.file.sync()?;

        Ok(())
    }

    /**
    Indicates that the contents of the builder should be abandoned.

    If the creator of the table does not call [`TableBuilder::finalize`], it must call
    [`TableBuilder::abandon`]. The caller is responsible for removing the partially written file.
    */
    pub(crate) fn abandon(&mut self) {
        self.file_closed = true;
    }

    /// Get the current size of the table file.
    pub(crate) fn file_size(&self) -> u64 {
        self.current_offset
    }

    /**
    Get the approximate size the table file would have if it was finalized now.

    This includes the data block that is still being built.
    */
    pub(crate) fn approximate_file_size(&self) -> u64 {
        self.current_offset + self.data_block_builder.approximate_size() as u64
    }

    /// Get the number of entries added to the table.
    pub(crate) fn get_num_entries(&self) -> u64 {
        self.num_entries
    }
}

/// Private methods
impl TableBuilder {
    /// Prepares a data block and its index entry and writes them out.
    fn write_data_block(&mut self) -> TableBuildResult<()> {
        if self.data_block_builder.is_empty() {
            return Ok(());
        }

        let block_offset = self.current_offset;
        let block_contents = self.data_block_builder.finalize().to_vec();
        let stored_size = match self.compression {
            TableFileCompressionType::None => {
                self.emit_block_to_disk(&block_contents, TableFileCompressionType::None)?
            }
            TableFileCompressionType::Snappy => {
                let compressed_block = snap::raw::Encoder::new()
                    .compress_vec(&block_contents)
                    .map_err(|err| BuilderError::Compression(err.to_string()))?;

                // Emit the raw block if the compression ratio is less than 12.5% (1/8)
                let savings_threshold = block_contents.len()
                    - (block_contents.len() / MIN_COMPRESSION_SAVINGS_DIVISOR);
                if compressed_block.len() < savings_threshold {
                    self.emit_block_to_disk(&compressed_block, TableFileCompressionType::Snappy)?
                } else {
                    self.emit_block_to_disk(&block_contents, TableFileCompressionType::None)?
                }
            }
        };

        // The block handle does not include the block descriptor
        let block_handle = BlockHandle::new(block_offset, stored_size as u64);
        if let Some(first_key) = self.maybe_block_first_key.take() {
            self.index_block
                .write_length_prefixed_slice(&first_key.as_bytes())?;
            self.index_block.extend(Vec::<u8>::from(&block_handle));
        }

        self.data_block_builder.reset();

        Ok(())
    }

    /**
    Actually performs the operations to write a block to disk.

    Returns the number of bytes of block contents written, excluding the descriptor.
    */
    fn emit_block_to_disk(
        &mut self,
        block_contents: &[u8],
        compression_type: TableFileCompressionType,
    ) -> TableBuildResult<usize> {
        // The checksum covers the contents and the compression type
        let checksum = checksum_of_parts(&[block_contents, &[compression_type as u8]]);

        let mut buf = Vec::with_capacity(block_contents.len() + BLOCK_DESCRIPTOR_SIZE_BYTES);
        buf.extend_from_slice(block_contents);
        buf.push(compression_type as u8);
        buf.extend_from_slice(&mask_checksum(checksum).encode_fixed_vec());

        self.file.write_all(&buf)?;
        self.file_digest.update(&buf);
        self.current_offset += buf.len() as u64;

        Ok(block_contents.len())
    }
}

impl fmt::Debug for TableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBuilder")
            .field("file_number", &self.file_number)
            .field("current_offset", &self.current_offset)
            .field("num_entries", &self.num_entries)
            .field("file_closed", &self.file_closed)
            .finish()
    }
}
