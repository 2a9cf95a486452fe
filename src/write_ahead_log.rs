/*!
The write ahead log (WAL) persists writes to disk to enable recovery of in-memory information in
the event of a crash.

Each WAL segment backs exactly one memtable generation. Every user record in the segment is a single
serialized [`Entry`] and uses the [log file format](crate::logs).

A segment may only be removed once the memtable it backs has been durably flushed to a table file.
*/

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::entry::{decode_entry, encode_entry, Entry};
use crate::errors::MistDBResult;
use crate::file_names::FileNameHandler;
use crate::fs::FileSystem;
use crate::logs::{LogReader, LogWriter};

/// Appends entries to a single WAL segment.
pub(crate) struct WALWriter {
    /// The number of the segment being written.
    wal_number: u64,

    /// The underlying log file writer.
    log_writer: LogWriter,
}

/// Crate-only methods
impl WALWriter {
    /// Create a new, empty WAL segment with the given number.
    pub(crate) fn new(
        fs: Arc<dyn FileSystem>,
        file_name_handler: &FileNameHandler,
        wal_number: u64,
    ) -> MistDBResult<Self> {
        let wal_path = file_name_handler.get_wal_file_path(wal_number);
        log::info!("Creating write-ahead log {} at {:?}", wal_number, wal_path);
        let log_writer = LogWriter::new(fs, wal_path, false)?;

        Ok(Self {
            wal_number,
            log_writer,
        })
    }

    /**
    Durably persist the entry.

    The entry is committed once this returns successfully; the log file has been synced to the
    storage medium.
    */
    pub(crate) fn append(&mut self, entry: &Entry) -> MistDBResult<()> {
        self.log_writer.append(&encode_entry(entry))?;
        self.log_writer.sync()?;

        Ok(())
    }
}

impl fmt::Debug for WALWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WALWriter")
            .field("wal_number", &self.wal_number)
            .finish()
    }
}

/**
A lazy, sequential reader of the entries in a WAL segment.

Iteration stops at the first record that is incomplete, fails its checksum or does not decode to an
entry. Everything yielded before that point is considered committed.
*/
pub(crate) struct WALReplay {
    /// The number of the segment being replayed.
    wal_number: u64,

    /// The underlying log file reader. Set to `None` once the end of valid data is reached.
    log_reader: Option<LogReader>,

    /// Describes why replay stopped before the physical end of the segment, if it did.
    stop_reason: Option<String>,
}

/// Crate-only methods
impl WALReplay {
    /// Open the WAL segment at `wal_path` for replay.
    pub(crate) fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        wal_path: P,
        wal_number: u64,
    ) -> MistDBResult<Self> {
        let log_reader = LogReader::new(fs, wal_path)?;

        Ok(Self {
            wal_number,
            log_reader: Some(log_reader),
            stop_reason: None,
        })
    }

    /// Describes why replay stopped early. This is `None` if the whole segment was valid.
    pub(crate) fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Stop replaying with the given reason.
    fn stop(&mut self, reason: String) {
        log::warn!(
            "Stopped replaying write-ahead log {} before its end. Treating the rest of the log as \
            a torn write. Reason: {}",
            self.wal_number,
            reason
        );
        self.stop_reason = Some(reason);
        self.log_reader = None;
    }
}

impl Iterator for WALReplay {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let reader = self.log_reader.as_mut()?;
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => {
                if reader.bytes_dropped() > 0 {
                    let reason = format!(
                        "{} bytes of a partially written record were dropped",
                        reader.bytes_dropped()
                    );
                    self.stop(reason);
                } else {
                    self.log_reader = None;
                }

                return None;
            }
            Err(read_err) => {
                self.stop(read_err.to_string());
                return None;
            }
        };

        match decode_entry(&record) {
            Ok((entry, bytes_read)) if bytes_read == record.len() => Some(entry),
            Ok((_, bytes_read)) => {
                self.stop(format!(
                    "a record had {} unexpected trailing bytes",
                    record.len() - bytes_read
                ));
                None
            }
            Err(decode_err) => {
                self.stop(decode_err.to_string());
                None
            }
        }
    }
}

impl fmt::Debug for WALReplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WALReplay")
            .field("wal_number", &self.wal_number)
            .field("stop_reason", &self.stop_reason)
            .finish()
    }
}

/**
Remove a WAL segment.

Callers must only do this after the memtable backed by the segment has been durably flushed and the
flush has been recorded in the manifest.
*/
pub(crate) fn drop_segment(
    fs: &Arc<dyn FileSystem>,
    file_name_handler: &FileNameHandler,
    wal_number: u64,
) -> MistDBResult<()> {
    let wal_path = file_name_handler.get_wal_file_path(wal_number);
    log::info!("Removing write-ahead log {} at {:?}", wal_number, wal_path);
    fs.remove_file(&wal_path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::fs::OpenOptions;
    use std::io::Write;

    use crate::fs::OsFileSystem;

    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<dyn FileSystem>, FileNameHandler) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();

        let temp_dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());
        let file_name_handler = FileNameHandler::new(temp_dir.path());
        fs.create_dir_all(&file_name_handler.get_wal_dir()).unwrap();

        (temp_dir, fs, file_name_handler)
    }

    #[test]
    fn appended_entries_are_replayed_in_order() {
        let (_temp_dir, fs, file_name_handler) = setup();
        let entries = vec![
            Entry::new_put(b"b".to_vec(), b"2".to_vec(), 1),
            Entry::new_put(b"a".to_vec(), b"1".to_vec(), 2),
            Entry::new_delete(b"b".to_vec(), 3),
        ];

        let mut writer = WALWriter::new(Arc::clone(&fs), &file_name_handler, 5).unwrap();
        for entry in entries.iter() {
            writer.append(entry).unwrap();
        }
        drop(writer);

        let mut replay =
            WALReplay::new(fs, file_name_handler.get_wal_file_path(5), 5).unwrap();
        let replayed: Vec<Entry> = replay.by_ref().collect();
        assert_eq!(replayed, entries);
        assert_eq!(replay.stop_reason(), None);
    }

    #[test]
    fn replay_stops_at_garbage_appended_after_the_last_record() {
        let (_temp_dir, fs, file_name_handler) = setup();
        let mut writer = WALWriter::new(Arc::clone(&fs), &file_name_handler, 1).unwrap();
        writer
            .append(&Entry::new_put(b"k1".to_vec(), b"v1".to_vec(), 1))
            .unwrap();
        writer
            .append(&Entry::new_put(b"k2".to_vec(), b"v2".to_vec(), 2))
            .unwrap();
        drop(writer);

        // Simulate a torn write of a third record
        let wal_path = file_name_handler.get_wal_file_path(1);
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[0x12, 0x34, 0x56, 0x78, 0x40, 0x00, 0x01, 0x03])
            .unwrap();
        drop(file);

        let mut replay = WALReplay::new(fs, wal_path, 1).unwrap();
        let keys: Vec<Vec<u8>> = replay
            .by_ref()
            .map(|entry| entry.user_key().to_vec())
            .collect();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
        assert!(replay.stop_reason().is_some());
    }

    #[test]
    fn dropped_segments_are_removed_from_disk() {
        let (_temp_dir, fs, file_name_handler) = setup();
        let writer = WALWriter::new(Arc::clone(&fs), &file_name_handler, 9).unwrap();
        assert_eq!(writer.wal_number, 9);
        drop(writer);

        let wal_path = file_name_handler.get_wal_file_path(9);
        assert!(fs.exists(&wal_path));
        drop_segment(&fs, &file_name_handler, 9).unwrap();
        assert!(!fs.exists(&wal_path));
    }
}
