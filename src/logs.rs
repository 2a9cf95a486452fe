/*!
The log file format is used by both write-ahead logs and manifest files (a.k.a. descriptor logs).

The log file contents are series of 32 KiB blocks.

Each block holds one or more physical records. A physical record has a 7 byte header made up of a
4 byte masked CRC32C checksum, a 2 byte u16 length and a 1 byte record type, followed by the data.

A record never starts within the last 6 bytes of a block (since it won't fit). Any leftover bytes
here form the trailer, which must consist entirely of zero bytes and must be skipped by readers.

Note that if exactly seven bytes are left in the current block, and a new non-zero length record is
added, the writer must emit a [`BlockType::First`] record (which contains zero bytes of user data)
to fill up the trailing seven bytes of the block and then emit all of the user data in subsequent
blocks.
*/

use integer_encoding::FixedInt;
use std::convert::TryFrom;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{LogIOError, LogSerializationErrorKind};
use crate::fs::{FileSystem, RandomAccessFile, ReadonlyRandomAccessFile};
use crate::utils::crc::{checksum_of_parts, mask_checksum, unmask_checksum};

/**
The length of block headers.

This is 7 bytes.
*/
pub(crate) const HEADER_LENGTH_BYTES: usize = 4 + 2 + 1;

/**
The size of blocks in the log file format.

This is set at 32 KiB.
*/
pub(crate) const BLOCK_SIZE_BYTES: usize = 32 * 1024;

/// Alias for a [`Result`] that wraps a [`LogIOError`].
pub(crate) type LogIOResult<T> = Result<T, LogIOError>;

/**
Block record types denote whether the data contained in the block is split across multiple
blocks or if they contain all of the data for a single user record.

Note, the use of record is overloaded here. Be aware of the distinction between a block record
and the actual user record.

Zero is not a valid type so that zero-filled regions of a file are never mistaken for records.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BlockType {
    /// Denotes that the block contains the entirety of a user record.
    Full = 1,
    /// Denotes the first fragment of a user record.
    First = 2,
    /// Denotes the interior fragments of a user record.
    Middle = 3,
    /// Denotes the last fragment of a user record.
    Last = 4,
}

impl TryFrom<u8> for BlockType {
    type Error = LogIOError;

    fn try_from(value: u8) -> LogIOResult<BlockType> {
        let block_type = match value {
            1 => BlockType::Full,
            2 => BlockType::First,
            3 => BlockType::Middle,
            4 => BlockType::Last,
            _ => {
                return Err(LogIOError::Seralization(LogSerializationErrorKind::Other(
                    format!(
                        "There was an problem parsing the block type. The value received was {}",
                        value
                    ),
                )))
            }
        };

        Ok(block_type)
    }
}

/// Calculate the checksum that protects a physical record. The type byte is covered as well.
fn record_checksum(block_type: u8, data: &[u8]) -> u32 {
    checksum_of_parts(&[&[block_type], data])
}

/** Handles all write activity to a log file. */
pub(crate) struct LogWriter {
    /// The path to the log file.
    log_file_path: PathBuf,

    /// The underlying file representing the log.
    log_file: Box<dyn RandomAccessFile>,

    /**
    The offset in the current block being written to.

    This position is not necessarily aligned to a block i.e. it can be in the middle of a block
    during a write operation.
    */
    current_block_offset: usize,
}

/// Crate-only methods
impl LogWriter {
    /**
    Construct a new [`LogWriter`].

    When `is_appending` is true, writes continue from the end of an existing file.
    */
    pub(crate) fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        log_file_path: P,
        is_appending: bool,
    ) -> LogIOResult<Self> {
        log::info!(
            "Creating/appending to a log file at {}",
            log_file_path.as_ref().to_string_lossy()
        );
        let log_file = fs.create_file(log_file_path.as_ref(), is_appending)?;
        let log_file_size = log_file.len()? as usize;

        Ok(LogWriter {
            log_file_path: log_file_path.as_ref().to_path_buf(),
            log_file,
            current_block_offset: log_file_size % BLOCK_SIZE_BYTES,
        })
    }

    /**
    Append `data` to the log as a single user record.

    The data is handed to the operating system but is not guaranteed to be durable until
    [`LogWriter::sync`] is called.
    */
    pub(crate) fn append(&mut self, data: &[u8]) -> LogIOResult<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(data.len() + HEADER_LENGTH_BYTES);
        let mut data_to_write = data;
        let mut is_first_data_chunk = true;

        loop {
            let block_available_space = BLOCK_SIZE_BYTES - self.current_block_offset;
            if block_available_space < HEADER_LENGTH_BYTES {
                if block_available_space > 0 {
                    log::debug!(
                        "Log file {:?}. There is not enough remaining space in the current block \
                        for the header. Filling it with zeroes.",
                        self.log_file_path
                    );
                    buf.extend_from_slice(&[0; HEADER_LENGTH_BYTES - 1][..block_available_space]);
                }

                // Switch to a new block
                self.current_block_offset = 0;
            }

            let space_available_for_data =
                BLOCK_SIZE_BYTES - self.current_block_offset - HEADER_LENGTH_BYTES;

            // The length available for the next data chunk a.k.a. how much of the buffer can
            // actually be written
            let block_data_chunk_length = data_to_write.len().min(space_available_for_data);

            let is_last_data_chunk = data_to_write.len() == block_data_chunk_length;
            let block_type = if is_first_data_chunk && is_last_data_chunk {
                BlockType::Full
            } else if is_first_data_chunk {
                BlockType::First
            } else if is_last_data_chunk {
                BlockType::Last
            } else {
                BlockType::Middle
            };

            let (chunk, rest) = data_to_write.split_at(block_data_chunk_length);
            self.encode_physical_record(&mut buf, block_type, chunk)?;
            data_to_write = rest;
            is_first_data_chunk = false;

            if data_to_write.is_empty() {
                // An empty buffer still produces one zero-length record
                break;
            }
        }

        self.log_file.write_all(&buf)?;
        self.log_file.flush()?;

        Ok(())
    }

    /// Persist everything appended so far to the storage medium.
    pub(crate) fn sync(&mut self) -> LogIOResult<()> {
        self.log_file.sync()?;

        Ok(())
    }
}

/// Private methods
impl LogWriter {
    /// Serialize a physical record into `buf` and advance the block offset.
    fn encode_physical_record(
        &mut self,
        buf: &mut Vec<u8>,
        block_type: BlockType,
        data_chunk: &[u8],
    ) -> LogIOResult<()> {
        // Convert `usize` to `u16` so that it fits in our header format.
        let data_length = u16::try_from(data_chunk.len())?;
        let checksum = record_checksum(block_type as u8, data_chunk);

        // Mask the checksum before storage in case there are other checksums being done
        buf.extend_from_slice(&mask_checksum(checksum).encode_fixed_vec());
        buf.extend_from_slice(&data_length.encode_fixed_vec());
        buf.push(block_type as u8);
        buf.extend_from_slice(data_chunk);

        self.current_block_offset += HEADER_LENGTH_BYTES + data_chunk.len();

        Ok(())
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("log_file_path", &self.log_file_path)
            .field("current_block_offset", &self.current_block_offset)
            .finish()
    }
}

/// The outcome of reading a single physical record.
enum PhysicalRead {
    /// A physical record that passed validation.
    Record(BlockType, Vec<u8>),

    /// The end of the file was reached cleanly.
    EndOfFile,

    /**
    The file ends in the middle of a physical record. This is what a crash during an append
    leaves behind.
    */
    TornTail(usize),
}

/** Handles all read activity to a log file. */
pub(crate) struct LogReader {
    /** The underlying file representing the log. */
    log_file: Box<dyn ReadonlyRandomAccessFile>,

    /// The path to the log file.
    log_file_path: PathBuf,

    /**
    The contents of the block currently being read.
    */
    block_buffer: Vec<u8>,

    /// The offset into `block_buffer` of the next unread byte.
    buffer_offset: usize,

    /**
    The offset in the file of the byte following the last block read.
    */
    end_of_buffer_offset: u64,

    /// Set when the last block read was shorter than a full block.
    reached_end_of_file: bool,

    /// The number of bytes that were dropped because of a torn tail.
    bytes_dropped: usize,
}

/// Crate-only methods
impl LogReader {
    /**
    Construct a new [`LogReader`].

    * `fs`- The wrapped file system to use for I/O.
    * `log_file_path` - The absolute path to the log file.
    */
    pub(crate) fn new<P: AsRef<Path>>(fs: Arc<dyn FileSystem>, log_file_path: P) -> LogIOResult<Self> {
        log::info!("Reading the log file at {:?}", log_file_path.as_ref());
        let log_file = fs.open_file(log_file_path.as_ref())?;

        Ok(Self {
            log_file,
            log_file_path: log_file_path.as_ref().to_path_buf(),
            block_buffer: vec![],
            buffer_offset: 0,
            end_of_buffer_offset: 0,
            reached_end_of_file: false,
            bytes_dropped: 0,
        })
    }

    /**
    Read the next user record from the log file.

    Returns `Ok(None)` when there are no more complete records. A record that was only partially
    written (e.g. the writer crashed in the middle of an append) is dropped and also ends the log.

    # Errors

    Returns [`LogIOError::Corruption`] if a record fails its checksum or the record fragments are
    out of order.
    */
    pub(crate) fn read_record(&mut self) -> LogIOResult<Option<Vec<u8>>> {
        // A buffer consolidating all of the fragments retrieved from the log file.
        let mut data_buffer: Vec<u8> = vec![];
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                PhysicalRead::Record(block_type, data) => match block_type {
                    BlockType::Full => {
                        if in_fragmented_record {
                            return Err(self.corruption("a full record interrupted a fragmented one"));
                        }

                        return Ok(Some(data));
                    }
                    BlockType::First => {
                        if in_fragmented_record {
                            return Err(self.corruption("a first fragment followed a first fragment"));
                        }

                        in_fragmented_record = true;
                        data_buffer = data;
                    }
                    BlockType::Middle => {
                        if !in_fragmented_record {
                            return Err(self.corruption("a middle fragment had no first fragment"));
                        }

                        data_buffer.extend(data);
                    }
                    BlockType::Last => {
                        if !in_fragmented_record {
                            return Err(self.corruption("a last fragment had no first fragment"));
                        }

                        data_buffer.extend(data);
                        return Ok(Some(data_buffer));
                    }
                },
                PhysicalRead::EndOfFile => {
                    if in_fragmented_record {
                        self.log_drop(data_buffer.len(), "the last record was never completed");
                    }

                    return Ok(None);
                }
                PhysicalRead::TornTail(num_bytes) => {
                    self.log_drop(
                        num_bytes + data_buffer.len(),
                        "the log ends with a partially written record",
                    );

                    return Ok(None);
                }
            }
        }
    }

    /// The number of bytes that were skipped because the log ended with a torn write.
    pub(crate) fn bytes_dropped(&self) -> usize {
        self.bytes_dropped
    }
}

/// Private methods.
impl LogReader {
    /// Read the physical record from the file system.
    fn read_physical_record(&mut self) -> LogIOResult<PhysicalRead> {
        loop {
            let remaining = self.block_buffer.len() - self.buffer_offset;
            if remaining < HEADER_LENGTH_BYTES {
                if self.reached_end_of_file {
                    self.buffer_offset = self.block_buffer.len();
                    if remaining > 0 {
                        // The file ended in the middle of a header.
                        return Ok(PhysicalRead::TornTail(remaining));
                    }

                    return Ok(PhysicalRead::EndOfFile);
                }

                // Anything left over in a full block is the zero-filled trailer
                self.read_next_block()?;
                continue;
            }

            let header = &self.block_buffer[self.buffer_offset..self.buffer_offset + HEADER_LENGTH_BYTES];
            let expected_checksum = unmask_checksum(u32::decode_fixed(&header[0..4]));
            let data_length = u16::decode_fixed(&header[4..6]) as usize;
            let raw_block_type = header[6];

            if HEADER_LENGTH_BYTES + data_length > remaining {
                self.buffer_offset = self.block_buffer.len();
                if self.reached_end_of_file {
                    // The writer died before the payload was completely written.
                    return Ok(PhysicalRead::TornTail(remaining));
                }

                return Err(self.corruption("a record length points past the end of its block"));
            }

            let data_start = self.buffer_offset + HEADER_LENGTH_BYTES;
            let data = self.block_buffer[data_start..data_start + data_length].to_vec();
            self.buffer_offset = data_start + data_length;

            let block_type = BlockType::try_from(raw_block_type)
                .map_err(|err| self.corruption(&err.to_string()))?;

            let calculated_checksum = record_checksum(raw_block_type, &data);
            if calculated_checksum != expected_checksum {
                return Err(self.corruption(&format!(
                    "the checksums of the data did not match. Expected {expected_checksum} but \
                    got {calculated_checksum}"
                )));
            }

            return Ok(PhysicalRead::Record(block_type, data));
        }
    }

    /// Load the next block of the file into the block buffer.
    fn read_next_block(&mut self) -> LogIOResult<()> {
        let mut buf = vec![0; BLOCK_SIZE_BYTES];
        let mut total_read: usize = 0;
        while total_read < BLOCK_SIZE_BYTES {
            let bytes_read = self.log_file.read_from(
                &mut buf[total_read..],
                self.end_of_buffer_offset as usize + total_read,
            )?;
            if bytes_read == 0 {
                break;
            }

            total_read += bytes_read;
        }

        buf.truncate(total_read);
        self.end_of_buffer_offset += total_read as u64;
        self.reached_end_of_file = total_read < BLOCK_SIZE_BYTES;
        self.block_buffer = buf;
        self.buffer_offset = 0;

        Ok(())
    }

    /// Create a corruption error describing the problem.
    fn corruption(&self, reason: &str) -> LogIOError {
        LogIOError::Corruption(format!(
            "Corruption detected in log file {:?} near offset {}: {}",
            self.log_file_path, self.end_of_buffer_offset, reason
        ))
    }

    /// Log bytes dropped with the provided reason.
    fn log_drop(&mut self, num_bytes_dropped: usize, reason: &str) {
        self.bytes_dropped += num_bytes_dropped;
        log::warn!(
            "Skipped reading {} bytes of log file {:?}. Reason: {}",
            num_bytes_dropped,
            self.log_file_path,
            reason
        );
    }
}

impl fmt::Debug for LogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReader")
            .field("log_file_path", &self.log_file_path)
            .field("end_of_buffer_offset", &self.end_of_buffer_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::fs::OpenOptions;
    use std::io::Write;

    use crate::fs::OsFileSystem;

    use super::*;

    fn setup() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    fn read_all(fs: Arc<dyn FileSystem>, path: &Path) -> LogIOResult<Vec<Vec<u8>>> {
        let mut reader = LogReader::new(fs, path)?;
        let mut records = vec![];
        while let Some(record) = reader.read_record()? {
            records.push(record);
        }

        Ok(records)
    }

    #[test]
    fn records_of_every_size_can_be_read_back_in_order() {
        setup();
        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let log_path = temp_dir.path().join("records.log");

        let records: Vec<Vec<u8>> = vec![
            b"small".to_vec(),
            vec![],
            vec![1; BLOCK_SIZE_BYTES - 2 * HEADER_LENGTH_BYTES],
            vec![2; 3 * BLOCK_SIZE_BYTES + 17],
            b"after the big one".to_vec(),
        ];

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        for record in records.iter() {
            writer.append(record).unwrap();
        }
        writer.sync().unwrap();

        assert_eq!(read_all(fs, &log_path).unwrap(), records);
    }

    #[test]
    fn a_writer_can_continue_an_existing_log() {
        setup();
        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let log_path = temp_dir.path().join("appended.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(&vec![9; BLOCK_SIZE_BYTES - 10]).unwrap();
        drop(writer);

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, true).unwrap();
        writer.append(b"second").unwrap();
        writer.append(b"third").unwrap();
        drop(writer);

        let records = read_all(fs, &log_path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], b"second".to_vec());
        assert_eq!(records[2], b"third".to_vec());
    }

    #[test]
    fn a_truncated_final_record_is_dropped_and_earlier_records_survive() {
        setup();
        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let log_path = temp_dir.path().join("torn.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"first").unwrap();
        writer.append(b"second").unwrap();
        writer.append(&vec![3; 100]).unwrap();
        drop(writer);

        let full_length = std::fs::metadata(&log_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(full_length - 40).unwrap();

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(b"first".to_vec()));
        assert_eq!(reader.read_record().unwrap(), Some(b"second".to_vec()));
        assert_eq!(reader.read_record().unwrap(), None);
        assert!(reader.bytes_dropped() > 0);
    }

    #[test]
    fn a_record_spanning_blocks_that_is_cut_off_is_dropped() {
        setup();
        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let log_path = temp_dir.path().join("torn_fragments.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"kept").unwrap();
        writer.append(&vec![4; 2 * BLOCK_SIZE_BYTES]).unwrap();
        drop(writer);

        let file = OpenOptions::new().write(true).open(&log_path).unwrap();
        file.set_len(BLOCK_SIZE_BYTES as u64 + 100).unwrap();

        assert_eq!(read_all(fs, &log_path).unwrap(), vec![b"kept".to_vec()]);
    }

    #[test]
    fn a_checksum_mismatch_is_reported_as_corruption() {
        setup();
        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let log_path = temp_dir.path().join("corrupt.log");

        let mut writer = LogWriter::new(Arc::clone(&fs), &log_path, false).unwrap();
        writer.append(b"first").unwrap();
        writer.append(b"second").unwrap();
        drop(writer);

        // Flip a byte in the payload of the second record
        let mut contents = std::fs::read(&log_path).unwrap();
        let last_index = contents.len() - 1;
        contents[last_index] ^= 0xff;
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&log_path)
            .unwrap();
        file.write_all(&contents).unwrap();

        let mut reader = LogReader::new(Arc::clone(&fs), &log_path).unwrap();
        assert_eq!(reader.read_record().unwrap(), Some(b"first".to_vec()));
        assert!(matches!(
            reader.read_record(),
            Err(LogIOError::Corruption(_))
        ));
    }
}
