use integer_encoding::{FixedInt, VarInt};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::config::{TableFileCompressionType, SIZE_OF_U32_BYTES};
use crate::entry::Entry;
use crate::errors::{table_read_error, DBIOError, MistDBError, MistDBResult};
use crate::fs::ReadonlyRandomAccessFile;
use crate::iterator::MistDbIterator;
use crate::key::InternalKey;
use crate::utils::crc::{matches_masked_checksum, unmask_checksum, CRC_CALCULATOR};

use super::block::{BlockIter, BlockReader};
use super::block_handle::BlockHandle;
use super::constants::BLOCK_DESCRIPTOR_SIZE_BYTES;
use super::errors::{ReadError, TableResult};
use super::footer::{Footer, SIZE_OF_FOOTER_BYTES};

/// The size of the chunks read when verifying the checksum of a whole table file.
const CHECKSUM_READ_CHUNK_BYTES: usize = 64 * 1024;

/**
An immutable, sorted map of internal keys to values.

# Concurrency

A table is thread-safe.
*/
pub(crate) struct Table {
    /// The file number of the table file.
    file_number: u64,

    /// The underlying file holding the table data.
    file: Box<dyn ReadonlyRandomAccessFile>,

    /// The footer of the table file.
    footer: Footer,

    /// The offset where the footer starts. Blocks must end at or before this offset.
    data_end: usize,

    /// The parsed index block. Pairs of the first key of a data block and the handle to the block.
    index: Vec<(InternalKey, BlockHandle)>,
}

/// Crate-only methods
impl Table {
    /**
    Open a table file and parse the information required to search it.

    The footer and the checksum covering the entire file are validated before anything else is
    parsed.
    */
    pub(crate) fn open(
        file_number: u64,
        file: Box<dyn ReadonlyRandomAccessFile>,
    ) -> TableResult<Table> {
        let file_length = file.len()? as usize;
        if file_length < SIZE_OF_FOOTER_BYTES {
            return Err(ReadError::FailedToParse(format!(
                "Failed to open the table file. The file length ({:?}) is invalid.",
                file_length
            )));
        }

        log::debug!("Reading and parsing the footer of table file {}", file_number);
        let data_end = file_length - SIZE_OF_FOOTER_BYTES;
        let mut footer_buf: Vec<u8> = vec![0; SIZE_OF_FOOTER_BYTES];
        Table::read_exact_at(&*file, &mut footer_buf, data_end)?;
        let footer = Footer::try_from(footer_buf.as_slice())?;

        Table::verify_file_checksum(&*file, data_end, footer.get_masked_file_checksum())?;

        log::debug!("Reading and parsing the index of table file {}", file_number);
        let raw_index = Table::read_block_contents(&*file, data_end, footer.get_index_handle())?;
        let index = Table::parse_index(&raw_index)?;

        Ok(Table {
            file_number,
            file,
            footer,
            data_end,
            index,
        })
    }

    /// Get the file number of the table.
    pub(crate) fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the number of entries stored in the table.
    pub(crate) fn num_entries(&self) -> u64 {
        self.footer.get_num_entries()
    }

    /**
    Get the newest entry for the user key of `key` that is visible at the sequence number of `key`.

    `key` is expected to be a seek key. A tombstone is returned as an [`Entry`] without a value.
    Returns `None` if the table does not hold a visible record for the user key.
    */
    pub(crate) fn get(&self, key: &InternalKey) -> TableResult<Option<Entry>> {
        // Nothing in the block picked by the index may be >= `key`, in which case the answer can
        // only be the first entry of the following block
        for block_index in self.index_position_for(key)..self.index.len() {
            let block = self.read_block(block_index)?;
            if let Some((found_key, found_value)) = block.find(key) {
                if found_key.get_user_key() != key.get_user_key() {
                    return Ok(None);
                }

                return Ok(Some(Entry::from_internal_key(found_key, found_value)));
            }
        }

        Ok(None)
    }

    /**
    Get an iterator for the table.

    The iterator walks the index block to find data blocks and then walks each data block. It shares
    ownership of the table so that it can be kept in collections of iterators that outlive any single borrow.
    */
    pub(crate) fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator {
            table: Arc::clone(self),
            block_index: 0,
            maybe_data_block_iter: None,
            maybe_error: None,
        }
    }
}

// Private methods
impl Table {
    /**
    Get the index of the data block that could hold the first key at or after `target`.

    This is the last block whose first key is not greater than `target`.
    */
    fn index_position_for(&self, target: &InternalKey) -> usize {
        self.index
            .partition_point(|(first_key, _)| first_key.cmp(target) != Ordering::Greater)
            .saturating_sub(1)
    }

    /// Read and parse the data block at the specified position in the index.
    fn read_block(&self, block_index: usize) -> TableResult<Arc<BlockReader>> {
        let (_, block_handle) = &self.index[block_index];
        let block_data = Table::read_block_contents(&*self.file, self.data_end, block_handle)?;

        Ok(Arc::new(BlockReader::new(&block_data)?))
    }

    /// Fill `buf` from the file starting at `offset`.
    fn read_exact_at(
        file: &dyn ReadonlyRandomAccessFile,
        buf: &mut [u8],
        offset: usize,
    ) -> TableResult<()> {
        let bytes_read = file.read_from(buf, offset)?;
        if bytes_read != buf.len() {
            return Err(ReadError::IO(DBIOError::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Expected to read {} bytes at offset {} but only got {}.",
                    buf.len(),
                    offset,
                    bytes_read
                ),
            )));
        }

        Ok(())
    }

    /// Check every byte in front of the footer against the checksum stored in the footer.
    fn verify_file_checksum(
        file: &dyn ReadonlyRandomAccessFile,
        data_end: usize,
        masked_checksum: u32,
    ) -> TableResult<()> {
        let mut digest = CRC_CALCULATOR.digest();
        let mut buf: Vec<u8> = vec![0; CHECKSUM_READ_CHUNK_BYTES];
        let mut offset = 0;
        while offset < data_end {
            let chunk_size = CHECKSUM_READ_CHUNK_BYTES.min(data_end - offset);
            Table::read_exact_at(file, &mut buf[..chunk_size], offset)?;
            digest.update(&buf[..chunk_size]);
            offset += chunk_size;
        }

        if digest.finalize() != unmask_checksum(masked_checksum) {
            return Err(ReadError::ChecksumMismatch(
                "The contents of the table file do not match the checksum in the footer."
                    .to_string(),
            ));
        }

        Ok(())
    }

    /**
    Return the decompressed contents of the block at the specified block handle.

    The block checksum is validated before decompression.
    */
    fn read_block_contents(
        file: &dyn ReadonlyRandomAccessFile,
        data_end: usize,
        block_handle: &BlockHandle,
    ) -> TableResult<Vec<u8>> {
        let block_data_size = block_handle.get_size() as usize;
        let total_block_size = block_data_size + BLOCK_DESCRIPTOR_SIZE_BYTES;
        let block_offset = block_handle.get_offset() as usize;
        if block_offset
            .checked_add(total_block_size)
            .map_or(true, |block_end| block_end > data_end)
        {
            return Err(ReadError::FailedToParse(format!(
                "The block handle at offset {} with size {} points past the end of the table data.",
                block_offset, block_data_size
            )));
        }

        let mut raw_block_data: Vec<u8> = vec![0; total_block_size];
        Table::read_exact_at(file, &mut raw_block_data, block_offset)?;

        // The block checksum covers the contents and the compression type
        let offset_to_checksum = total_block_size - SIZE_OF_U32_BYTES;
        let stored_checksum = u32::decode_fixed(&raw_block_data[offset_to_checksum..]);
        if !matches_masked_checksum(stored_checksum, &[&raw_block_data[..offset_to_checksum]]) {
            return Err(ReadError::ChecksumMismatch(format!(
                "The block at offset {} does not match its checksum.",
                block_offset
            )));
        }

        let compression_type = TableFileCompressionType::try_from(raw_block_data[block_data_size])
            .map_err(|err| ReadError::BlockDecompression(err.to_string()))?;
        raw_block_data.truncate(block_data_size);
        match compression_type {
            TableFileCompressionType::None => Ok(raw_block_data),
            TableFileCompressionType::Snappy => snap::raw::Decoder::new()
                .decompress_vec(&raw_block_data)
                .map_err(|err| ReadError::BlockDecompression(err.to_string())),
        }
    }

    /// Deserialize the index block.
    fn parse_index(raw_index: &[u8]) -> TableResult<Vec<(InternalKey, BlockHandle)>> {
        let mut index = vec![];
        let mut offset = 0;
        while offset < raw_index.len() {
            let (key_length, key_length_size) = u32::decode_var(&raw_index[offset..])
                .ok_or_else(|| {
                    ReadError::FailedToParse(
                        "Failed to read the length of a key in the index block.".to_string(),
                    )
                })?;
            offset += key_length_size;

            let key_end = offset + key_length as usize;
            if key_end > raw_index.len() {
                return Err(ReadError::FailedToParse(
                    "A key in the index block is longer than the rest of the block.".to_string(),
                ));
            }
            let first_key = InternalKey::try_from(&raw_index[offset..key_end])
                .map_err(|err| ReadError::FailedToParse(err.to_string()))?;
            offset = key_end;

            let (block_handle, handle_size) = BlockHandle::deserialize(&raw_index[offset..])?;
            offset += handle_size;

            if let Some((last_key, _)) = index.last() {
                if last_key >= &first_key {
                    return Err(ReadError::FailedToParse(
                        "The entries of the index block are out of order.".to_string(),
                    ));
                }
            }

            index.push((first_key, block_handle));
        }

        Ok(index)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("file_number", &self.file_number)
            .field("footer", &self.footer)
            .field("num_blocks", &self.index.len())
            .finish()
    }
}

/**
A two-level iterator that first iterates the index and then iterates a corresponding data block.

This iterator yields the concatenation of all key-value pairs in the data blocks of a table file.
*/
pub(crate) struct TableIterator {
    /// The table the iterator is for.
    table: Arc<Table>,

    /// The position in the index of the current data block.
    block_index: usize,

    /// Iterator for the current data block.
    maybe_data_block_iter: Option<BlockIter>,

    /// The first error encountered while moving between blocks.
    maybe_error: Option<MistDBError>,
}

/// Private methods
impl TableIterator {
    /// Load the data block at the specified position in the index.
    fn load_block(&mut self, block_index: usize) -> MistDBResult<()> {
        self.block_index = block_index;
        match self.table.read_block(block_index) {
            Ok(block) => {
                self.maybe_data_block_iter = Some(block.iter());
                Ok(())
            }
            Err(read_err) => {
                self.maybe_data_block_iter = None;
                Err(table_read_error(self.table.file_number, read_err))
            }
        }
    }

    fn data_block_is_valid(&self) -> bool {
        self.maybe_data_block_iter
            .as_ref()
            .map_or(false, |iter| iter.is_valid())
    }

    /// Move forward through the index until a data block with entries is found.
    fn skip_empty_data_blocks_forward(&mut self) -> MistDBResult<()> {
        while !self.data_block_is_valid() {
            if self.block_index + 1 >= self.table.index.len() {
                // We've reached the end of the index so there are no more data blocks
                self.maybe_data_block_iter = None;
                return Ok(());
            }

            self.load_block(self.block_index + 1)?;
            if let Some(data_block_iter) = self.maybe_data_block_iter.as_mut() {
                data_block_iter.seek_to_first()?;
            }
        }

        Ok(())
    }

    /**
    Move backward through the index until a data block with entries is found.

    If a data block is found, the data block iterator is set to the last entry of the block.
    */
    fn skip_empty_data_blocks_backward(&mut self) -> MistDBResult<()> {
        while !self.data_block_is_valid() {
            if self.block_index == 0 {
                self.maybe_data_block_iter = None;
                return Ok(());
            }

            self.load_block(self.block_index - 1)?;
            if let Some(data_block_iter) = self.maybe_data_block_iter.as_mut() {
                data_block_iter.seek_to_last()?;
            }
        }

        Ok(())
    }

    /// Invalidate the iterator and hold on to the error for [`MistDbIterator::take_error`].
    fn record_error(&mut self, error: MistDBError) {
        log::error!(
            "There was an error moving between blocks of table file {}. Error: {}",
            self.table.file_number,
            error
        );
        self.maybe_data_block_iter = None;
        if self.maybe_error.is_none() {
            self.maybe_error = Some(error);
        }
    }
}

impl MistDbIterator for TableIterator {
    type Key = InternalKey;
    type Error = MistDBError;

    fn is_valid(&self) -> bool {
        self.data_block_is_valid()
    }

    fn seek(&mut self, target: &InternalKey) -> MistDBResult<()> {
        if self.table.index.is_empty() {
            self.maybe_data_block_iter = None;
            return Ok(());
        }

        self.load_block(self.table.index_position_for(target))?;
        if let Some(data_block_iter) = self.maybe_data_block_iter.as_mut() {
            data_block_iter.seek(target)?;
        }

        self.skip_empty_data_blocks_forward()
    }

    fn seek_to_first(&mut self) -> MistDBResult<()> {
        if self.table.index.is_empty() {
            self.maybe_data_block_iter = None;
            return Ok(());
        }

        self.load_block(0)?;
        if let Some(data_block_iter) = self.maybe_data_block_iter.as_mut() {
            data_block_iter.seek_to_first()?;
        }

        self.skip_empty_data_blocks_forward()
    }

    fn seek_to_last(&mut self) -> MistDBResult<()> {
        if self.table.index.is_empty() {
            self.maybe_data_block_iter = None;
            return Ok(());
        }

        self.load_block(self.table.index.len() - 1)?;
        if let Some(data_block_iter) = self.maybe_data_block_iter.as_mut() {
            data_block_iter.seek_to_last()?;
        }

        self.skip_empty_data_blocks_backward()
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        if !self.is_valid() {
            return None;
        }

        let moved = self
            .maybe_data_block_iter
            .as_mut()
            .map_or(false, |iter| iter.next().is_some());
        if !moved {
            if let Err(error) = self.skip_empty_data_blocks_forward() {
                self.record_error(error);
                return None;
            }
        }

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        if !self.is_valid() {
            return None;
        }

        let moved = self
            .maybe_data_block_iter
            .as_mut()
            .map_or(false, |iter| iter.prev().is_some());
        if !moved {
            if let Err(error) = self.skip_empty_data_blocks_backward() {
                self.record_error(error);
                return None;
            }
        }

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.maybe_data_block_iter.as_ref()?.current()
    }

    fn take_error(&mut self) -> Option<MistDBError> {
        self.maybe_error.take()
    }
}

impl fmt::Debug for TableIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableIterator")
            .field("table", &self.table)
            .field("block_index", &self.block_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    use crate::fs::{FileSystem, OsFileSystem};
    use crate::key::Operation;
    use crate::tables::TableBuilder;
    use crate::DbOptions;

    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<dyn FileSystem>) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();

        (tempfile::tempdir().unwrap(), Arc::new(OsFileSystem::new()))
    }

    fn key_for(index: usize) -> Vec<u8> {
        format!("key-{:05}", index).into_bytes()
    }

    /// Write a table with `num_keys` keys where every third key is a tombstone.
    fn build_table(
        fs: &Arc<dyn FileSystem>,
        path: &PathBuf,
        options: &DbOptions,
        num_keys: usize,
    ) -> u64 {
        let mut builder = TableBuilder::new(options, Arc::clone(fs), path, 7).unwrap();
        for index in 0..num_keys {
            let sequence_number = (index + 1) as u64;
            if index % 3 == 2 {
                builder
                    .add_entry(
                        &InternalKey::new(key_for(index), sequence_number, Operation::Delete),
                        &[],
                    )
                    .unwrap();
            } else {
                builder
                    .add_entry(
                        &InternalKey::new(key_for(index), sequence_number, Operation::Put),
                        format!("value-{}", index).as_bytes(),
                    )
                    .unwrap();
            }
        }
        builder.finalize().unwrap();

        builder.file_size()
    }

    fn open_table(fs: &Arc<dyn FileSystem>, path: &PathBuf) -> TableResult<Arc<Table>> {
        Ok(Arc::new(Table::open(7, fs.open_file(path)?)?))
    }

    #[test]
    fn a_table_spanning_many_blocks_can_be_searched() {
        let (temp_dir, fs) = setup();
        let path = temp_dir.path().join("7.rdb");
        let options = DbOptions {
            max_block_size: 256,
            ..DbOptions::default()
        };
        let file_size = build_table(&fs, &path, &options, 500);
        assert_eq!(fs.get_file_size(&path).unwrap(), file_size);

        let table = open_table(&fs, &path).unwrap();
        assert_eq!(table.num_entries(), 500);
        assert_eq!(table.file_number(), 7);
        assert!(table.index.len() > 10);

        let found = table
            .get(&InternalKey::new_for_seeking(key_for(250), 1000))
            .unwrap()
            .unwrap();
        assert_eq!(found.value(), Some("value-250".as_bytes()));
        assert_eq!(found.sequence_number(), 251);

        let tombstone = table
            .get(&InternalKey::new_for_seeking(key_for(251), 1000))
            .unwrap()
            .unwrap();
        assert!(tombstone.is_tombstone());

        // The record is newer than the sequence number being read at
        assert_eq!(
            table
                .get(&InternalKey::new_for_seeking(key_for(250), 10))
                .unwrap(),
            None
        );
        assert_eq!(
            table
                .get(&InternalKey::new_for_seeking(b"key-00250a".to_vec(), 1000))
                .unwrap(),
            None
        );
        assert_eq!(
            table
                .get(&InternalKey::new_for_seeking(b"zzz".to_vec(), 1000))
                .unwrap(),
            None
        );
    }

    #[test]
    fn table_iterator_walks_every_entry_in_both_directions() {
        let (temp_dir, fs) = setup();
        let path = temp_dir.path().join("7.rdb");
        let options = DbOptions {
            max_block_size: 128,
            compression: TableFileCompressionType::None,
            ..DbOptions::default()
        };
        build_table(&fs, &path, &options, 200);
        let table = open_table(&fs, &path).unwrap();

        let mut iter = table.iter();
        iter.seek_to_first().unwrap();
        let mut forward_keys = vec![iter.current().unwrap().0.get_user_key().to_vec()];
        while let Some((key, _)) = iter.next() {
            forward_keys.push(key.get_user_key().to_vec());
        }
        let expected_keys: Vec<Vec<u8>> = (0..200).map(key_for).collect();
        assert_eq!(forward_keys, expected_keys);
        assert!(iter.take_error().is_none());

        iter.seek_to_last().unwrap();
        let mut backward_count = 1;
        while iter.prev().is_some() {
            backward_count += 1;
        }
        assert_eq!(backward_count, 200);

        iter.seek(&InternalKey::new_for_seeking(b"key-00099z".to_vec(), 1000))
            .unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), key_for(100).as_slice());

        iter.seek(&InternalKey::new_for_seeking(b"zzz".to_vec(), 1000))
            .unwrap();
        assert!(!iter.is_valid());
    }

    #[test]
    fn corrupted_table_contents_are_detected_on_open() {
        let (temp_dir, fs) = setup();
        let path = temp_dir.path().join("7.rdb");
        build_table(&fs, &path, &DbOptions::default(), 100);

        let mut raw_table = std::fs::read(&path).unwrap();
        raw_table[10] ^= 0xff;
        std::fs::write(&path, &raw_table).unwrap();

        let open_result = open_table(&fs, &path);
        assert!(matches!(open_result, Err(ReadError::ChecksumMismatch(_))));
    }

    #[test]
    fn truncated_table_files_fail_to_open() {
        let (temp_dir, fs) = setup();
        let path = temp_dir.path().join("7.rdb");
        build_table(&fs, &path, &DbOptions::default(), 100);

        let raw_table = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw_table[..raw_table.len() - 5]).unwrap();
        assert!(open_table(&fs, &path).is_err());

        std::fs::write(&path, &raw_table[..10]).unwrap();
        assert!(matches!(
            open_table(&fs, &path),
            Err(ReadError::FailedToParse(_))
        ));
    }

    #[test]
    fn an_empty_table_has_no_entries() {
        let (temp_dir, fs) = setup();
        let path = temp_dir.path().join("7.rdb");
        build_table(&fs, &path, &DbOptions::default(), 0);

        let table = open_table(&fs, &path).unwrap();
        assert_eq!(table.num_entries(), 0);
        assert_eq!(
            table
                .get(&InternalKey::new_for_seeking(key_for(1), 1000))
                .unwrap(),
            None
        );

        let mut iter = table.iter();
        iter.seek_to_first().unwrap();
        assert!(!iter.is_valid());
    }
}
