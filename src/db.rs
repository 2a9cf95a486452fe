/*!
The database module contains the primary API for interacting with the key-value store.

# Concurrency

Writes are serialized through the mutex guarding [`GuardedDbFields`]. Reads never take that lock.
They load the visible sequence number and then the current [`ReadState`], which is swapped
atomically whenever the memtables or the version change.
*/

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::compaction::{CompactionWorker, ManualCompaction, TaskKind};
use crate::config::{L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, MAX_NUM_LEVELS};
use crate::entry::Entry;
use crate::errors::{MistDBError, MistDBResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::{FileLock, FileSystem};
use crate::iterator::BoxedInternalIterator;
use crate::key::{InternalKey, Operation, MAX_SEQUENCE_NUMBER};
use crate::memtable::{MemTable, SkipListMemTable};
use crate::table_cache::TableCache;
use crate::tables::TableBuilder;
use crate::versioning::file_iterators::MergingIterator;
use crate::versioning::file_metadata::FileMetadata;
use crate::versioning::version::Version;
use crate::versioning::{VersionChangeManifest, VersionSet};
use crate::write_ahead_log::{self, WALReplay, WALWriter};
use crate::DbOptions;

mod iterator;
pub use iterator::DatabaseIterator;

#[cfg(test)]
mod db_test;

#[cfg(test)]
mod test_utils;

/// The lifecycle states of a database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DatabaseLifecycle {
    /// The database is recovering its persisted state.
    Opening,

    /// The database accepts reads and writes.
    Open,

    /// The database is flushing and stopping its background work.
    Closing,

    /// Every operation fails with [`MistDBError::Closed`].
    Closed,
}

/**
The memtables and version consulted by readers.

These are always published together so that a reader never misses records that moved from a
memtable to a table file.
*/
pub(crate) struct ReadState {
    /// The memtable receiving writes.
    pub(crate) memtable: Arc<dyn MemTable>,

    /// The memtable being flushed to a table file, if any.
    pub(crate) maybe_immutable_memtable: Option<Arc<dyn MemTable>>,

    /// The current version of the table files.
    pub(crate) version: Arc<Version>,
}

impl fmt::Debug for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadState")
            .field("memtable_size", &self.memtable.approximate_memory_usage())
            .field(
                "has_immutable_memtable",
                &self.maybe_immutable_memtable.is_some(),
            )
            .field("version", &self.version)
            .finish()
    }
}

/// Fields of the database that require a lock to be held before being read or written to.
pub(crate) struct GuardedDbFields {
    /// The memtable receiving writes.
    pub(crate) memtable: Arc<dyn MemTable>,

    /// A memtable that is full and is waiting to be flushed to a table file.
    pub(crate) maybe_immutable_memtable: Option<Arc<dyn MemTable>>,

    /// The write-ahead log backing `memtable`. This is `None` once the database is closed.
    pub(crate) wal: Option<WALWriter>,

    /// The number of the write-ahead log backing `memtable`.
    pub(crate) curr_wal_file_number: u64,

    /// The set of versions of the database.
    pub(crate) version_set: VersionSet,

    /**
    An error from background work that stops further writes.

    This is set when a memtable could not be flushed or a write-ahead log write failed.
    */
    pub(crate) maybe_bad_database_state: Option<MistDBError>,

    /// Whether a compaction task has been sent to the compaction worker and has not finished yet.
    pub(crate) background_compaction_scheduled: bool,

    /// A manual compaction waiting to be processed by the compaction worker.
    pub(crate) maybe_manual_compaction: Option<ManualCompaction>,

    /**
    Table files that are being written and are not yet part of a version.

    These are protected from obsolete file removal.
    */
    pub(crate) pending_outputs: HashSet<u64>,

    /// The lifecycle state of the database.
    pub(crate) lifecycle: DatabaseLifecycle,

    /// The worker performing flushes and compactions.
    pub(crate) maybe_compaction_worker: Option<CompactionWorker>,

    /// The lock on the database directory, held until the database is closed.
    pub(crate) maybe_db_lock: Option<FileLock>,
}

impl fmt::Debug for GuardedDbFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedDbFields")
            .field("curr_wal_file_number", &self.curr_wal_file_number)
            .field("version_set", &self.version_set)
            .field("maybe_bad_database_state", &self.maybe_bad_database_state)
            .field(
                "background_compaction_scheduled",
                &self.background_compaction_scheduled,
            )
            .field("pending_outputs", &self.pending_outputs)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/**
Database state that can be shared with the compaction worker thread.

All fields are cheap to clone handles to shared state.
*/
#[derive(Clone)]
pub(crate) struct PortableDatabaseState {
    /// Options for configuring the operation of the database.
    pub(crate) options: DbOptions,

    /// Handler for file names used by the database.
    pub(crate) file_name_handler: Arc<FileNameHandler>,

    /// Cache of opened table files.
    pub(crate) table_cache: Arc<TableCache>,

    /// Database state that require a lock to be held before being read or written to.
    pub(crate) guarded_db_fields: Arc<Mutex<GuardedDbFields>>,

    /// Set when the database is closing so that background work can stop early.
    pub(crate) is_shutting_down: Arc<AtomicBool>,

    /// Whether there is an immutable memtable waiting to be flushed.
    pub(crate) has_immutable_memtable: Arc<AtomicBool>,

    /// Signalled whenever a unit of background work finishes.
    pub(crate) background_work_finished_signal: Arc<Condvar>,

    /// The state consulted by readers.
    pub(crate) read_state: Arc<ArcSwap<ReadState>>,

    /// The largest sequence number whose write is fully applied to the memtable.
    pub(crate) visible_sequence_number: Arc<AtomicU64>,
}

impl fmt::Debug for PortableDatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortableDatabaseState")
            .field("db_path", &self.options.db_path())
            .field("is_shutting_down", &self.is_shutting_down)
            .field("has_immutable_memtable", &self.has_immutable_memtable)
            .field("visible_sequence_number", &self.visible_sequence_number)
            .finish()
    }
}

/**
An embedded, persistent and ordered key-value store.

The database must be opened with [`DB::open`]. It can be shared between threads (e.g. wrapped in an
[`Arc`]). Dropping the database closes it.
*/
#[derive(Debug)]
pub struct DB {
    /// State shared with the compaction worker.
    db_state: PortableDatabaseState,
}

/// Public methods
impl DB {
    /**
    Open the database described by `options`.

    Opening recovers the version state from the manifest, replays write-ahead logs that were not
    yet flushed to table files, and validates the table files referenced by the version. Table files
    that fail validation are quarantined. Any other failure fails the open with
    [`MistDBError::Open`].
    */
    pub fn open(options: DbOptions) -> MistDBResult<DB> {
        log::info!(
            "Opening the database at {} with the following options {:#?}",
            options.db_path(),
            options
        );

        let fs = options.filesystem_provider();
        let file_name_handler = Arc::new(FileNameHandler::new(options.db_path()));
        let database_exists = fs.exists(&file_name_handler.get_current_file_path());
        if !database_exists && !options.create_if_missing {
            return Err(MistDBError::Open(format!(
                "No database exists at {} and create_if_missing is false.",
                options.db_path()
            )));
        }

        if database_exists && options.error_if_exists {
            return Err(MistDBError::Open(format!(
                "A database already exists at {} and error_if_exists is true.",
                options.db_path()
            )));
        }

        fs.create_dir_all(file_name_handler.get_db_path())
            .map_err(|err| {
                MistDBError::Open(format!("Failed to create the database directory. {}", err))
            })?;
        let db_lock = fs
            .lock_file(&file_name_handler.get_lock_file_path())
            .map_err(|err| {
                MistDBError::Open(format!(
                    "Failed to lock the database directory. It may be in use by another process. \
                    {}",
                    err
                ))
            })?;

        DB::recover_and_start(options, file_name_handler, db_lock, database_exists).map_err(
            |err| match err {
                MistDBError::Open(_) => err,
                other => MistDBError::Open(other.to_string()),
            },
        )
    }

    /**
    Get the value stored for `key`.

    Returns `None` if the key does not exist or was deleted.
    */
    pub fn get(&self, key: &[u8]) -> MistDBResult<Option<Vec<u8>>> {
        if self.db_state.is_shutting_down.load(Ordering::Acquire) {
            return Err(MistDBError::Closed);
        }

        // The read state must be loaded before the sequence number. Compactions that produced the
        // pinned tables then only dropped records shadowed at or below the snapshot.
        let read_state = self.db_state.read_state.load_full();
        let snapshot = self.db_state.visible_sequence_number.load(Ordering::Acquire);

        if let Some(entry) = read_state.memtable.get(key, snapshot) {
            return Ok(entry.value().map(<[u8]>::to_vec));
        }

        if let Some(immutable_memtable) = read_state.maybe_immutable_memtable.as_ref() {
            if let Some(entry) = immutable_memtable.get(key, snapshot) {
                return Ok(entry.value().map(<[u8]>::to_vec));
            }
        }

        let lookup_key = InternalKey::new_for_seeking(key.to_vec(), snapshot);
        match read_state
            .version
            .get(&self.db_state.table_cache, &lookup_key)
        {
            Ok(maybe_entry) => Ok(maybe_entry.and_then(|entry| entry.value().map(<[u8]>::to_vec))),
            Err(MistDBError::CorruptBlock(corruption)) => {
                let mut db_fields_guard = self.db_state.guarded_db_fields.lock();
                DB::quarantine_table(&self.db_state, &mut db_fields_guard, corruption.file_number);

                Err(MistDBError::CorruptBlock(corruption))
            }
            Err(read_err) => Err(read_err),
        }
    }

    /**
    Set `key` to `value`.

    The write is durable in the write-ahead log when this returns successfully.
    */
    pub fn put(&self, key: &[u8], value: &[u8]) -> MistDBResult<()> {
        self.write_entry(key, Some(value))
    }

    /**
    Delete `key`.

    The deletion is recorded as a tombstone and is durable in the write-ahead log when this returns
    successfully.
    */
    pub fn delete(&self, key: &[u8]) -> MistDBResult<()> {
        self.write_entry(key, None)
    }

    /**
    Create an iterator over the database.

    The iterator is a point in time view of the database. Writes, flushes and compactions that
    happen after the iterator is created are not visible through it.
    */
    pub fn new_iterator(&self) -> MistDBResult<DatabaseIterator> {
        if self.db_state.is_shutting_down.load(Ordering::Acquire) {
            return Err(MistDBError::Closed);
        }

        // Same load order as `get`
        let read_state = self.db_state.read_state.load_full();
        let snapshot = self.db_state.visible_sequence_number.load(Ordering::Acquire);

        let mut iterators: Vec<BoxedInternalIterator> = vec![read_state.memtable.iter()];
        if let Some(immutable_memtable) = read_state.maybe_immutable_memtable.as_ref() {
            iterators.push(immutable_memtable.iter());
        }

        match read_state.version.new_iterators(&self.db_state.table_cache) {
            Ok(table_iterators) => iterators.extend(table_iterators),
            Err(MistDBError::CorruptBlock(corruption)) => {
                let mut db_fields_guard = self.db_state.guarded_db_fields.lock();
                DB::quarantine_table(&self.db_state, &mut db_fields_guard, corruption.file_number);

                return Err(MistDBError::CorruptBlock(corruption));
            }
            Err(err) => return Err(err),
        }

        Ok(DatabaseIterator::new(
            Arc::clone(&self.db_state.is_shutting_down),
            read_state,
            MergingIterator::new(iterators),
            snapshot,
        ))
    }

    /**
    Close the database.

    If [`DbOptions::flush_on_close`] is set, the memtable is flushed to a table file first.
    Background work is stopped and the lock on the database directory is released. Closing an
    already closed database does nothing.
    */
    pub fn close(&self) -> MistDBResult<()> {
        let db_state = &self.db_state;
        let mut db_fields_guard = db_state.guarded_db_fields.lock();
        if matches!(
            db_fields_guard.lifecycle,
            DatabaseLifecycle::Closing | DatabaseLifecycle::Closed
        ) {
            return Ok(());
        }

        log::info!("Closing the database at {}.", db_state.options.db_path());
        db_fields_guard.lifecycle = DatabaseLifecycle::Closing;

        let mut close_result: MistDBResult<()> = Ok(());
        if db_state.options.flush_on_close && db_fields_guard.maybe_bad_database_state.is_none() {
            log::info!("Flushing the memtable before closing the database.");
            close_result = DB::flush_memtable(db_state, &mut db_fields_guard);
        }

        db_state.is_shutting_down.store(true, Ordering::Release);
        db_state.background_work_finished_signal.notify_all();
        while db_fields_guard.background_compaction_scheduled {
            log::info!("Waiting for background work to finish before closing.");
            db_state
                .background_work_finished_signal
                .wait(&mut db_fields_guard);
        }

        if let Some(compaction_worker) = db_fields_guard.maybe_compaction_worker.take() {
            let stop_result =
                MutexGuard::unlocked(&mut db_fields_guard, || compaction_worker.stop());
            if let Err(stop_err) = stop_result {
                log::error!(
                    "Failed to stop the compaction worker cleanly. Error: {}",
                    stop_err
                );
            }
        }

        db_fields_guard.wal = None;
        db_fields_guard.lifecycle = DatabaseLifecycle::Closed;
        db_fields_guard.maybe_db_lock = None;
        db_state.background_work_finished_signal.notify_all();
        log::info!("Closed the database at {}.", db_state.options.db_path());

        close_result
    }

    /**
    Compact the key range from `begin` to `end` (inclusive). A `None` bound is unbounded.

    The memtable is flushed and every level holding files that overlap the range is compacted into
    the next level. Deleted and overwritten records in the range are discarded in the process.
    */
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> MistDBResult<()> {
        let begin_key =
            begin.map(|user_key| InternalKey::new_for_seeking(user_key.to_vec(), MAX_SEQUENCE_NUMBER));
        let end_key = end.map(|user_key| InternalKey::new(user_key.to_vec(), 0, Operation::Delete));

        let version = Arc::clone(&self.db_state.read_state.load().version);
        let mut max_level_with_files: usize = 1;
        for level in 1..MAX_NUM_LEVELS {
            let has_overlap = !version
                .get_overlapping_compaction_inputs(level, begin_key.as_ref()..end_key.as_ref())
                .is_empty();
            if has_overlap {
                max_level_with_files = level;
            }
        }
        drop(version);

        self.force_memtable_compaction()?;
        for level in 0..max_level_with_files {
            self.compact_level_range(level, begin_key.clone(), end_key.clone())?;
        }

        Ok(())
    }

    /// Flush the memtable to a table file and wait for the flush to finish.
    pub fn force_memtable_compaction(&self) -> MistDBResult<()> {
        let mut db_fields_guard = self.db_state.guarded_db_fields.lock();
        if db_fields_guard.lifecycle != DatabaseLifecycle::Open {
            return Err(MistDBError::Closed);
        }

        DB::flush_memtable(&self.db_state, &mut db_fields_guard)
    }

    /// Get the number of table files at the specified level.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.db_state
            .read_state
            .load()
            .version
            .num_files_at_level(level)
    }
}

/// Crate-only methods
impl DB {
    /**
    Flush `memtable` to a new table file and record the new file in `change_manifest`.

    The lock is released while the table is built. If `maybe_base_version` is provided, the new file
    may be placed in a level deeper than level 0. An empty memtable does not produce a file.
    */
    pub(crate) fn write_level0_table(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        memtable: Arc<dyn MemTable>,
        maybe_base_version: Option<&Version>,
        change_manifest: &mut VersionChangeManifest,
    ) -> MistDBResult<()> {
        let file_number = db_fields_guard.version_set.get_new_file_number();
        db_fields_guard.pending_outputs.insert(file_number);
        log::info!(
            "Flushing a memtable with {} records to table file {}.",
            memtable.len(),
            file_number
        );

        let build_result = MutexGuard::unlocked(db_fields_guard, || {
            DB::build_table(
                &db_state.options,
                &db_state.file_name_handler,
                file_number,
                memtable.as_ref(),
            )
        });
        db_fields_guard.pending_outputs.remove(&file_number);

        let file_metadata = match build_result? {
            Some(file_metadata) => file_metadata,
            None => {
                log::info!("The memtable was empty. No table file was created.");
                db_fields_guard.version_set.reuse_file_number(file_number);
                return Ok(());
            }
        };

        let level = maybe_base_version.map_or(0, |base_version| {
            base_version.pick_level_for_memtable_output(
                file_metadata.smallest_key().get_user_key(),
                file_metadata.largest_key().get_user_key(),
            )
        });
        log::info!(
            "Table file {} with size {} bytes was created for level {}.",
            file_number,
            file_metadata.get_file_size(),
            level
        );
        change_manifest.add_file(
            level,
            file_number,
            file_metadata.get_file_size(),
            file_metadata.smallest_key().clone()..file_metadata.largest_key().clone(),
        );

        Ok(())
    }

    /**
    Record a background error that stops further writes. Only the first error is kept.

    Waiting writers are woken so that they can observe the error.
    */
    pub(crate) fn set_bad_database_state(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        error: MistDBError,
    ) {
        if db_fields_guard.maybe_bad_database_state.is_none() {
            log::error!(
                "The database is in a bad state and will reject further writes. Error: {}",
                error
            );
            db_fields_guard.maybe_bad_database_state = Some(error);
        }

        db_state.background_work_finished_signal.notify_all();
    }

    /// Schedule a compaction on the compaction worker if there is any work to do.
    pub(crate) fn maybe_schedule_compaction(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) {
        if db_fields_guard.background_compaction_scheduled {
            // Already scheduled
            return;
        }

        if db_state.is_shutting_down.load(Ordering::Acquire)
            || db_fields_guard.maybe_bad_database_state.is_some()
        {
            return;
        }

        let has_manual_compaction = db_fields_guard
            .maybe_manual_compaction
            .as_ref()
            .map_or(false, |manual_compaction| !manual_compaction.is_done());
        if db_fields_guard.maybe_immutable_memtable.is_none()
            && !has_manual_compaction
            && !db_fields_guard.version_set.needs_compaction()
        {
            // No work to be done
            return;
        }

        let schedule_result = match db_fields_guard.maybe_compaction_worker.as_ref() {
            Some(compaction_worker) => compaction_worker.schedule_task(TaskKind::Compaction),
            None => return,
        };

        match schedule_result {
            Ok(()) => db_fields_guard.background_compaction_scheduled = true,
            Err(schedule_err) => {
                DB::set_bad_database_state(db_state, db_fields_guard, schedule_err.into());
            }
        }
    }

    /**
    Publish the memtables and the current version of the guarded fields to readers.

    This must be called after every change to the memtables or to the current version.
    */
    pub(crate) fn install_read_state(
        db_state: &PortableDatabaseState,
        db_fields_guard: &MutexGuard<GuardedDbFields>,
    ) {
        db_state.read_state.store(Arc::new(ReadState {
            memtable: Arc::clone(&db_fields_guard.memtable),
            maybe_immutable_memtable: db_fields_guard.maybe_immutable_memtable.clone(),
            version: db_fields_guard.version_set.get_current_version(),
        }));
    }

    /**
    Delete files that are no longer needed.

    Table files are kept while any live version references them or while they are being written.
    Write-ahead logs are kept if they may hold records that are not in a table file yet. Only the
    current manifest is kept.
    */
    pub(crate) fn remove_obsolete_files(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) {
        if db_fields_guard.maybe_bad_database_state.is_some() {
            // After a background error we don't know whether a new version may or may not have
            // been committed, so we cannot safely garbage collect
            return;
        }

        let mut files_to_keep = db_fields_guard.version_set.live_files();
        files_to_keep.extend(db_fields_guard.pending_outputs.iter());
        let wal_file_number = db_fields_guard.version_set.wal_file_number();
        let manifest_file_number = db_fields_guard.version_set.manifest_file_number();

        let fs = db_state.options.filesystem_provider();
        let file_name_handler = &db_state.file_name_handler;
        let dirs_to_check = [
            file_name_handler.get_db_path().to_path_buf(),
            file_name_handler.get_wal_dir(),
            file_name_handler.get_data_dir(),
        ];
        for dir in dirs_to_check {
            let dir_entries = match fs.list_dir(&dir) {
                Ok(dir_entries) => dir_entries,
                Err(list_err) => {
                    log::warn!(
                        "Failed to list {:?} while removing obsolete files. Error: {}",
                        dir,
                        list_err
                    );
                    continue;
                }
            };

            for path in dir_entries {
                let parsed_file_type = match FileNameHandler::parse_file_name(&path) {
                    Some(parsed_file_type) => parsed_file_type,
                    None => continue,
                };

                let should_keep = match parsed_file_type {
                    ParsedFileType::WriteAheadLog(wal_number) => wal_number >= wal_file_number,
                    ParsedFileType::ManifestFile(manifest_number) => {
                        manifest_number >= manifest_file_number
                    }
                    ParsedFileType::TableFile(file_number) => files_to_keep.contains(&file_number),
                    ParsedFileType::TempFile(_) => false,
                    ParsedFileType::CurrentFile | ParsedFileType::DBLockFile => true,
                };
                if should_keep {
                    continue;
                }

                let remove_result = match parsed_file_type {
                    ParsedFileType::WriteAheadLog(wal_number) => {
                        write_ahead_log::drop_segment(&fs, file_name_handler, wal_number)
                    }
                    ParsedFileType::TableFile(file_number) => {
                        db_state.table_cache.remove(file_number);
                        log::info!("Removing obsolete table file {:?}.", path);
                        fs.remove_file(&path).map_err(MistDBError::from)
                    }
                    _ => {
                        log::info!("Removing obsolete file {:?}.", path);
                        fs.remove_file(&path).map_err(MistDBError::from)
                    }
                };
                if let Err(remove_err) = remove_result {
                    log::warn!(
                        "Failed to remove obsolete file {:?}. Error: {}",
                        path,
                        remove_err
                    );
                }
            }
        }
    }

    /**
    Remove a corrupt table file from the current version and move it aside.

    The file is renamed so that it is kept for inspection but never read again.
    */
    pub(crate) fn quarantine_table(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        file_number: u64,
    ) {
        let current_version = db_fields_guard.version_set.get_current_version();
        let level = match current_version.find_file_level(file_number) {
            Some(level) => level,
            None => {
                log::warn!(
                    "Corrupt table file {} is not part of the current version. Skipping \
                    quarantine.",
                    file_number
                );
                return;
            }
        };
        drop(current_version);

        log::error!(
            "Quarantining corrupt table file {} at level {}.",
            file_number,
            level
        );
        let mut change_manifest = VersionChangeManifest::default();
        change_manifest.remove_file(level, file_number);
        if let Err(apply_err) = db_fields_guard.version_set.log_and_apply(change_manifest) {
            log::error!(
                "Failed to remove corrupt table file {} from the current version. Error: {}",
                file_number,
                apply_err
            );
            return;
        }

        db_state.table_cache.remove(file_number);
        DB::install_read_state(db_state, db_fields_guard);

        let file_name_handler = &db_state.file_name_handler;
        if let Err(rename_err) = db_state.options.filesystem_provider().rename(
            &file_name_handler.get_table_file_path(file_number),
            &file_name_handler.get_corrupt_table_file_path(file_number),
        ) {
            log::error!(
                "Failed to move corrupt table file {} aside. Error: {}",
                file_number,
                rename_err
            );
        }
    }
}

/// Private methods
impl DB {
    /**
    Recover the persisted state of the database and start background work.
    */
    fn recover_and_start(
        options: DbOptions,
        file_name_handler: Arc<FileNameHandler>,
        db_lock: FileLock,
        database_exists: bool,
    ) -> MistDBResult<DB> {
        let fs = options.filesystem_provider();
        fs.create_dir_all(&file_name_handler.get_wal_dir())?;
        fs.create_dir_all(&file_name_handler.get_data_dir())?;

        let table_cache = Arc::new(TableCache::new(&options));
        let mut version_set = VersionSet::new(options.clone(), Arc::clone(&file_name_handler));
        if !database_exists {
            log::info!(
                "No database found at {}. Creating a new database.",
                options.db_path()
            );
            version_set.create_new_database()?;
        }
        version_set.recover()?;

        let mut change_manifest = VersionChangeManifest::default();
        DB::validate_tables(
            &fs,
            &file_name_handler,
            &table_cache,
            &version_set,
            &mut change_manifest,
        )?;
        DB::replay_wals(
            &options,
            &file_name_handler,
            &mut version_set,
            &mut change_manifest,
        )?;

        let wal_number = version_set.get_new_file_number();
        let wal = WALWriter::new(Arc::clone(&fs), &file_name_handler, wal_number)?;
        change_manifest.wal_file_number = Some(wal_number);
        version_set.log_and_apply(change_manifest)?;

        let memtable: Arc<dyn MemTable> = Arc::new(SkipListMemTable::new());
        let read_state = ReadState {
            memtable: Arc::clone(&memtable),
            maybe_immutable_memtable: None,
            version: version_set.get_current_version(),
        };
        let last_sequence_number = version_set.last_sequence_number();
        let guarded_db_fields = GuardedDbFields {
            memtable,
            maybe_immutable_memtable: None,
            wal: Some(wal),
            curr_wal_file_number: wal_number,
            version_set,
            maybe_bad_database_state: None,
            background_compaction_scheduled: false,
            maybe_manual_compaction: None,
            pending_outputs: HashSet::new(),
            lifecycle: DatabaseLifecycle::Opening,
            maybe_compaction_worker: None,
            maybe_db_lock: Some(db_lock),
        };
        let db_state = PortableDatabaseState {
            options,
            file_name_handler,
            table_cache,
            guarded_db_fields: Arc::new(Mutex::new(guarded_db_fields)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            has_immutable_memtable: Arc::new(AtomicBool::new(false)),
            background_work_finished_signal: Arc::new(Condvar::new()),
            read_state: Arc::new(ArcSwap::from_pointee(read_state)),
            visible_sequence_number: Arc::new(AtomicU64::new(last_sequence_number)),
        };

        {
            let mut db_fields_guard = db_state.guarded_db_fields.lock();
            DB::remove_obsolete_files(&db_state, &mut db_fields_guard);

            let compaction_worker = CompactionWorker::new(db_state.clone())?;
            db_fields_guard.maybe_compaction_worker = Some(compaction_worker);
            db_fields_guard.lifecycle = DatabaseLifecycle::Open;
            DB::maybe_schedule_compaction(&db_state, &mut db_fields_guard);
        }

        log::info!(
            "Opened the database at {}. Last sequence number is {}.",
            db_state.options.db_path(),
            last_sequence_number
        );

        Ok(DB { db_state })
    }

    /**
    Check that every table file referenced by the current version exists and is readable.

    Missing files fail the open. Corrupt files are quarantined by recording their removal in
    `change_manifest` and moving them aside.
    */
    fn validate_tables(
        fs: &Arc<dyn FileSystem>,
        file_name_handler: &FileNameHandler,
        table_cache: &TableCache,
        version_set: &VersionSet,
        change_manifest: &mut VersionChangeManifest,
    ) -> MistDBResult<()> {
        let current_version = version_set.get_current_version();
        for (level, files) in current_version.files.iter().enumerate() {
            for file in files {
                let file_number = file.file_number();
                let table_path = file_name_handler.get_table_file_path(file_number);
                if !fs.exists(&table_path) {
                    return Err(MistDBError::Open(format!(
                        "Table file {} referenced by the manifest is missing.",
                        file_number
                    )));
                }

                match table_cache.find_table(file_number) {
                    Ok(_) => {}
                    Err(MistDBError::CorruptBlock(corruption)) => {
                        log::error!(
                            "Table file {} at level {} failed validation and will be \
                            quarantined. {}",
                            file_number,
                            level,
                            corruption
                        );
                        change_manifest.remove_file(level, file_number);
                        table_cache.remove(file_number);
                        fs.rename(
                            &table_path,
                            &file_name_handler.get_corrupt_table_file_path(file_number),
                        )?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(())
    }

    /**
    Replay every write-ahead log that may hold records not persisted to a table file.

    Replayed records are flushed to level 0 table files which are recorded in `change_manifest`.
    Replay of a log stops at its first torn or corrupt record.
    */
    fn replay_wals(
        options: &DbOptions,
        file_name_handler: &FileNameHandler,
        version_set: &mut VersionSet,
        change_manifest: &mut VersionChangeManifest,
    ) -> MistDBResult<()> {
        let fs = options.filesystem_provider();
        let min_wal_number = version_set.wal_file_number();
        let mut wal_numbers: Vec<u64> = fs
            .list_dir(&file_name_handler.get_wal_dir())?
            .iter()
            .filter_map(|path| match FileNameHandler::parse_file_name(path) {
                Some(ParsedFileType::WriteAheadLog(wal_number)) if wal_number >= min_wal_number => {
                    Some(wal_number)
                }
                _ => None,
            })
            .collect();
        wal_numbers.sort_unstable();

        let mut max_sequence_number = version_set.last_sequence_number();
        for wal_number in wal_numbers {
            version_set.mark_file_number_used(wal_number);
            log::info!("Replaying write-ahead log {}.", wal_number);

            let mut memtable = SkipListMemTable::new();
            let mut replay = WALReplay::new(
                Arc::clone(&fs),
                file_name_handler.get_wal_file_path(wal_number),
                wal_number,
            )?;
            let mut num_replayed: usize = 0;
            for entry in replay.by_ref() {
                max_sequence_number = max_sequence_number.max(entry.sequence_number());
                match entry.value() {
                    Some(value) => memtable.put(
                        entry.user_key().to_vec(),
                        value.to_vec(),
                        entry.sequence_number(),
                    ),
                    None => memtable.delete(entry.user_key().to_vec(), entry.sequence_number()),
                }
                num_replayed += 1;

                if memtable.approximate_memory_usage() > options.write_buffer_size {
                    DB::flush_recovered_memtable(
                        options,
                        file_name_handler,
                        version_set,
                        &memtable,
                        change_manifest,
                    )?;
                    memtable = SkipListMemTable::new();
                }
            }

            if let Some(stop_reason) = replay.stop_reason() {
                log::warn!(
                    "Write-ahead log {} ended with a torn or corrupt record. Records after it were \
                    dropped. {}",
                    wal_number,
                    stop_reason
                );
            }
            log::info!(
                "Replayed {} records from write-ahead log {}.",
                num_replayed,
                wal_number
            );

            DB::flush_recovered_memtable(
                options,
                file_name_handler,
                version_set,
                &memtable,
                change_manifest,
            )?;
        }

        if max_sequence_number > version_set.last_sequence_number() {
            version_set.set_last_sequence_number(max_sequence_number);
        }

        Ok(())
    }

    /// Flush a memtable built during recovery to a level 0 table file.
    fn flush_recovered_memtable(
        options: &DbOptions,
        file_name_handler: &FileNameHandler,
        version_set: &mut VersionSet,
        memtable: &SkipListMemTable,
        change_manifest: &mut VersionChangeManifest,
    ) -> MistDBResult<()> {
        if memtable.is_empty() {
            return Ok(());
        }

        let file_number = version_set.get_new_file_number();
        if let Some(file_metadata) =
            DB::build_table(options, file_name_handler, file_number, memtable)?
        {
            log::info!(
                "Recovered {} records into level 0 table file {}.",
                memtable.len(),
                file_number
            );
            change_manifest.add_file(
                0,
                file_number,
                file_metadata.get_file_size(),
                file_metadata.smallest_key().clone()..file_metadata.largest_key().clone(),
            );
        }

        Ok(())
    }

    /**
    Write the newest record of every user key in `memtable` to a new table file.

    Tombstones are kept because older table files may still hold values for the deleted keys.
    Returns `None` if the memtable is empty. A partially written file is removed on failure.
    */
    fn build_table(
        options: &DbOptions,
        file_name_handler: &FileNameHandler,
        file_number: u64,
        memtable: &dyn MemTable,
    ) -> MistDBResult<Option<FileMetadata>> {
        let mut newest_entries = memtable.scan(&[]).peekable();
        if newest_entries.peek().is_none() {
            return Ok(None);
        }

        let fs = options.filesystem_provider();
        let table_path = file_name_handler.get_table_file_path(file_number);
        let mut table_builder =
            TableBuilder::new(options, Arc::clone(&fs), &table_path, file_number)?;

        let build_result = (|| -> MistDBResult<FileMetadata> {
            let mut maybe_smallest_key: Option<InternalKey> = None;
            let mut maybe_largest_key: Option<InternalKey> = None;
            for entry in newest_entries {
                let key = entry.internal_key();
                table_builder.add_entry(&key, entry.value().unwrap_or_default())?;
                if maybe_smallest_key.is_none() {
                    maybe_smallest_key = Some(key.clone());
                }
                maybe_largest_key = Some(key);
            }

            table_builder.finalize()?;
            match (maybe_smallest_key, maybe_largest_key) {
                (Some(smallest_key), Some(largest_key)) => Ok(FileMetadata::new(
                    file_number,
                    table_builder.file_size(),
                    smallest_key,
                    largest_key,
                )),
                _ => Err(MistDBError::BadDatabaseState(format!(
                    "Table file {} was built without any records.",
                    file_number
                ))),
            }
        })();

        match build_result {
            Ok(file_metadata) => Ok(Some(file_metadata)),
            Err(build_err) => {
                log::error!(
                    "Failed to build table file {}. Removing the partial file. Error: {}",
                    file_number,
                    build_err
                );
                table_builder.abandon();
                if let Err(remove_err) = fs.remove_file(&table_path) {
                    log::warn!(
                        "Failed to remove partial table file {:?}. Error: {}",
                        table_path,
                        remove_err
                    );
                }

                Err(build_err)
            }
        }
    }

    /// Write a put or a tombstone for `key` to the write-ahead log and the memtable.
    fn write_entry(&self, key: &[u8], maybe_value: Option<&[u8]>) -> MistDBResult<()> {
        let db_state = &self.db_state;
        if key.len() > db_state.options.max_key_size {
            return Err(MistDBError::InvalidArgument(format!(
                "The key is {} bytes long which exceeds the maximum key size of {} bytes.",
                key.len(),
                db_state.options.max_key_size
            )));
        }

        if let Some(value) = maybe_value {
            if value.len() > db_state.options.max_value_size {
                return Err(MistDBError::InvalidArgument(format!(
                    "The value is {} bytes long which exceeds the maximum value size of {} bytes.",
                    value.len(),
                    db_state.options.max_value_size
                )));
            }
        }

        let mut db_fields_guard = db_state.guarded_db_fields.lock();
        if db_fields_guard.lifecycle != DatabaseLifecycle::Open {
            return Err(MistDBError::Closed);
        }

        DB::make_room_for_write(db_state, &mut db_fields_guard, false)?;
        if db_fields_guard.lifecycle != DatabaseLifecycle::Open {
            return Err(MistDBError::Closed);
        }

        let sequence_number = db_fields_guard.version_set.last_sequence_number() + 1;
        let entry = match maybe_value {
            Some(value) => Entry::new_put(key.to_vec(), value.to_vec(), sequence_number),
            None => Entry::new_delete(key.to_vec(), sequence_number),
        };

        let append_result = match db_fields_guard.wal.as_mut() {
            Some(wal) => wal.append(&entry),
            None => Err(MistDBError::Closed),
        };
        if let Err(append_err) = append_result {
            log::error!(
                "Failed to append to the write-ahead log. Error: {}",
                append_err
            );
            DB::set_bad_database_state(db_state, &mut db_fields_guard, append_err.clone());

            return Err(append_err);
        }

        match maybe_value {
            Some(value) => db_fields_guard
                .memtable
                .put(key.to_vec(), value.to_vec(), sequence_number),
            None => db_fields_guard.memtable.delete(key.to_vec(), sequence_number),
        }
        db_fields_guard
            .version_set
            .set_last_sequence_number(sequence_number);
        db_state
            .visible_sequence_number
            .store(sequence_number, Ordering::Release);

        Ok(())
    }

    /**
    Ensure there is room in the memtable for a write.

    Writes are delayed when level 0 holds many files and stopped while the memtable cannot be
    switched. If `force` is true, the memtable is switched even if it still has room.
    */
    fn make_room_for_write(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        force: bool,
    ) -> MistDBResult<()> {
        let mut allow_delay = !force;
        let mut force = force;

        loop {
            if let Some(bad_state_err) = db_fields_guard.maybe_bad_database_state.as_ref() {
                return Err(bad_state_err.clone());
            }

            if db_state.is_shutting_down.load(Ordering::Acquire) {
                return Err(MistDBError::Closed);
            }

            let num_level0_files = db_fields_guard.version_set.num_files_at_level(0);
            if allow_delay && num_level0_files >= L0_SLOWDOWN_WRITES_TRIGGER {
                // We are getting close to hitting a hard limit on the number of L0 files. Rather
                // than delaying a single write by several seconds when we hit the hard limit, start
                // delaying each individual write by 1ms to reduce latency variance. Also, this
                // delay hands over some CPU to the compaction thread in case it is sharing the
                // same core as the writer.
                log::debug!(
                    "Level 0 has {} files. Delaying the write by 1 ms.",
                    num_level0_files
                );
                MutexGuard::unlocked(db_fields_guard, || {
                    thread::sleep(Duration::from_millis(1));
                });

                // Do not delay a single write more than once
                allow_delay = false;
            } else if !force
                && db_fields_guard.memtable.approximate_memory_usage()
                    <= db_state.options.write_buffer_size
            {
                // There is room in the current memtable
                break;
            } else if db_fields_guard.maybe_immutable_memtable.is_some() {
                log::info!(
                    "The current memtable is full but the previous memtable is still being \
                    flushed. Waiting."
                );
                db_state
                    .background_work_finished_signal
                    .wait(db_fields_guard);
            } else if num_level0_files >= L0_STOP_WRITES_TRIGGER {
                log::info!(
                    "Level 0 has {} files. Stopping writes until a compaction finishes.",
                    num_level0_files
                );
                db_state
                    .background_work_finished_signal
                    .wait(db_fields_guard);
            } else {
                // Switch to a new memtable and write-ahead log and flush the old memtable
                let new_wal_number = db_fields_guard.version_set.get_new_file_number();
                let fs = db_state.options.filesystem_provider();
                let wal = match WALWriter::new(fs, &db_state.file_name_handler, new_wal_number) {
                    Ok(wal) => wal,
                    Err(wal_err) => {
                        log::error!(
                            "Failed to create write-ahead log {}. Error: {}",
                            new_wal_number,
                            wal_err
                        );
                        db_fields_guard
                            .version_set
                            .reuse_file_number(new_wal_number);

                        return Err(wal_err);
                    }
                };

                log::info!(
                    "Freezing the memtable backed by write-ahead log {}. New writes go to \
                    write-ahead log {}.",
                    db_fields_guard.curr_wal_file_number,
                    new_wal_number
                );
                db_fields_guard.wal = Some(wal);
                db_fields_guard.curr_wal_file_number = new_wal_number;
                let new_memtable: Arc<dyn MemTable> = Arc::new(SkipListMemTable::new());
                let immutable_memtable =
                    std::mem::replace(&mut db_fields_guard.memtable, new_memtable);
                db_fields_guard.maybe_immutable_memtable = Some(immutable_memtable);
                db_state
                    .has_immutable_memtable
                    .store(true, Ordering::Release);
                DB::install_read_state(db_state, db_fields_guard);

                // Do not force another switch
                force = false;
                DB::maybe_schedule_compaction(db_state, db_fields_guard);
            }
        }

        Ok(())
    }

    /// Freeze the memtable if it holds any records and wait until no memtable is pending a flush.
    fn flush_memtable(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) -> MistDBResult<()> {
        if !db_fields_guard.memtable.is_empty() {
            DB::make_room_for_write(db_state, db_fields_guard, true)?;
        }

        while db_fields_guard.maybe_immutable_memtable.is_some() {
            if let Some(bad_state_err) = db_fields_guard.maybe_bad_database_state.as_ref() {
                return Err(bad_state_err.clone());
            }

            db_state
                .background_work_finished_signal
                .wait(db_fields_guard);
        }

        match db_fields_guard.maybe_bad_database_state.as_ref() {
            Some(bad_state_err) => Err(bad_state_err.clone()),
            None => Ok(()),
        }
    }

    /// Compact the files at `level` that overlap the key range into the next level.
    fn compact_level_range(
        &self,
        level: usize,
        begin: Option<InternalKey>,
        end: Option<InternalKey>,
    ) -> MistDBResult<()> {
        let db_state = &self.db_state;
        let mut db_fields_guard = db_state.guarded_db_fields.lock();

        // Only one manual compaction is processed at a time
        while db_fields_guard.maybe_manual_compaction.is_some() {
            if db_fields_guard.lifecycle != DatabaseLifecycle::Open {
                return Err(MistDBError::Closed);
            }

            db_state
                .background_work_finished_signal
                .wait(&mut db_fields_guard);
        }

        log::info!("Starting a manual compaction of level {}.", level);
        db_fields_guard.maybe_manual_compaction = Some(ManualCompaction::new(level, begin, end));

        let compaction_result = loop {
            if db_fields_guard.lifecycle != DatabaseLifecycle::Open {
                break Err(MistDBError::Closed);
            }

            if let Some(bad_state_err) = db_fields_guard.maybe_bad_database_state.as_ref() {
                break Err(bad_state_err.clone());
            }

            let is_done = db_fields_guard
                .maybe_manual_compaction
                .as_ref()
                .map_or(true, |manual_compaction| manual_compaction.is_done());
            if is_done {
                break Ok(());
            }

            DB::maybe_schedule_compaction(db_state, &mut db_fields_guard);
            db_state
                .background_work_finished_signal
                .wait(&mut db_fields_guard);
        };

        db_fields_guard.maybe_manual_compaction = None;
        db_state.background_work_finished_signal.notify_all();
        log::info!("Finished the manual compaction of level {}.", level);

        compaction_result
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(close_err) = self.close() {
            log::error!(
                "Encountered an error closing the database during drop. Error: {}",
                close_err
            );
        }
    }
}
