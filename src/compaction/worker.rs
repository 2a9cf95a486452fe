use parking_lot::MutexGuard;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use crate::db::{GuardedDbFields, PortableDatabaseState};
use crate::errors::{MistDBError, MistDBResult};
use crate::iterator::MistDbIterator;
use crate::key::{InternalKey, Operation, MAX_SEQUENCE_NUMBER};
use crate::tables::TableBuilder;
use crate::versioning::file_iterators::MergingIterator;
use crate::versioning::file_metadata::FileMetadata;
use crate::versioning::VersionChangeManifest;
use crate::DB;

use super::errors::{CompactionWorkerError, CompactionWorkerResult};
use super::manifest::CompactionManifest;

/// Name of the compaction thread.
const COMPACTION_THREAD_NAME: &str = "mistdb-compaction";

/// The kinds of tasks that the compaction worker can schedule.
#[derive(Debug)]
pub(crate) enum TaskKind {
    /// Variant for scheduling a compaction job.
    Compaction,

    /// Variant for shutting down the compaction thread.
    Terminate,
}

/**
The compaction worker manages a thread that performs compaction actions.

The worker uses a channel to communicate new tasks to the background thread so that we can keep
reusing the same thread as opposed to continually spawning new threads.
*/
pub(crate) struct CompactionWorker {
    /**
    The join handle of the background compaction thread.

    This is used to try to gracefully shutdown the background compaction thread during database
    shutdown.
    */
    maybe_background_compaction_handle: Option<JoinHandle<()>>,

    /// Sender end of the channel that the worker utilizes to schedule tasks.
    task_sender: mpsc::Sender<TaskKind>,
}

/// Crate-only methods
impl CompactionWorker {
    /// Create a new instance of [`CompactionWorker`].
    pub(crate) fn new(db_state: PortableDatabaseState) -> CompactionWorkerResult<Self> {
        // Create a channel for sending tasks
        let (task_sender, receiver) = mpsc::channel();

        log::info!("Starting up the background compaction thread.");
        let background_thread_handle = thread::Builder::new()
            .name(COMPACTION_THREAD_NAME.to_string())
            .spawn(move || {
                log::info!("Compaction thread initializing.");
                let database_state = db_state;

                loop {
                    log::debug!("Compaction thread waiting for tasks.");
                    let task = match receiver.recv() {
                        Ok(task) => task,
                        Err(recv_err) => {
                            log::warn!(
                                "The compaction task channel was disconnected. Shutting down the \
                                compaction thread. Error: {}",
                                recv_err
                            );
                            break;
                        }
                    };

                    match task {
                        TaskKind::Compaction => {
                            log::debug!("Compaction thread receieved the compaction command.");
                            CompactionWorker::compaction_task(&database_state);
                        }
                        TaskKind::Terminate => {
                            log::info!(
                                "Compaction thread receieved the termination command. Shutting \
                                down the thread."
                            );
                            break;
                        }
                    }
                }
            })?;

        let thread = background_thread_handle.thread();
        let thread_name = thread.name().map_or("<unnamed>", |name| name);
        log::info!(
            "Compaction thread started with name {thread_name}.",
            thread_name = thread_name
        );

        let worker = Self {
            maybe_background_compaction_handle: Some(background_thread_handle),
            task_sender,
        };

        Ok(worker)
    }

    /// Schedule a task in the background thread.
    pub(crate) fn schedule_task(&self, task_kind: TaskKind) -> CompactionWorkerResult<()> {
        self.task_sender.send(task_kind).map_err(|send_err| {
            CompactionWorkerError::UnexpectedState(format!(
                "Failed to send a task to the compaction thread. The thread may have stopped. \
                Task: {:?}",
                send_err.0
            ))
        })
    }

    /// Stop the background thread and wait for it to exit.
    pub(crate) fn stop(mut self) -> CompactionWorkerResult<()> {
        self.schedule_task(TaskKind::Terminate)?;

        if let Some(handle) = self.maybe_background_compaction_handle.take() {
            handle.join().map_err(|_| {
                CompactionWorkerError::UnexpectedState(
                    "The compaction thread panicked.".to_string(),
                )
            })?;
        }

        Ok(())
    }

    /**
    Flush the immutable memtable to a table file and install the new version.

    Failures put the database into a bad state because the write-ahead log backing the memtable
    cannot be retired.
    */
    pub(crate) fn compact_memtable(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) {
        let immutable_memtable = match db_fields_guard.maybe_immutable_memtable.clone() {
            Some(immutable_memtable) => immutable_memtable,
            None => return,
        };

        log::info!("Compacting the immutable memtable to a table file.");
        let mut change_manifest = VersionChangeManifest::default();
        let base_version = db_fields_guard.version_set.get_current_version();
        let write_table_result = DB::write_level0_table(
            db_state,
            db_fields_guard,
            immutable_memtable,
            Some(base_version.as_ref()),
            &mut change_manifest,
        );
        drop(base_version);

        if let Err(write_table_error) = write_table_result {
            DB::set_bad_database_state(
                db_state,
                db_fields_guard,
                CompactionWorkerError::WriteTable(Box::new(write_table_error)).into(),
            );
            return;
        }

        // Do periodic check for shutdown state before proceeding to the next major compaction
        // operation
        if db_state.is_shutting_down.load(Ordering::Acquire) {
            log::error!(
                "Compaction thread discovered that the database was shutting down. Halting \
                compaction work. Recording background error to stop other writes from occurring."
            );

            DB::set_bad_database_state(
                db_state,
                db_fields_guard,
                CompactionWorkerError::UnexpectedState(
                    "Detected database shutdown signal while compacting the memtable.".to_string(),
                )
                .into(),
            );
            return;
        }

        // The memtable was converted to a table file so the write-ahead logs before the current
        // one are obsolete
        change_manifest.wal_file_number = Some(db_fields_guard.curr_wal_file_number);

        log::info!("Applying the memtable compaction to the current version.");
        if let Err(apply_error) = db_fields_guard.version_set.log_and_apply(change_manifest) {
            log::error!(
                "There was an error logging and applying the change manifest. Error: {}",
                apply_error
            );

            DB::set_bad_database_state(
                db_state,
                db_fields_guard,
                CompactionWorkerError::ApplyVersionChange(Box::new(apply_error)).into(),
            );
            return;
        }

        log::info!(
            "Compaction thread committing to new database state. Removing immutable memtable and \
            obsolete files."
        );
        db_fields_guard.maybe_immutable_memtable = None;
        db_state
            .has_immutable_memtable
            .store(false, Ordering::Release);
        DB::install_read_state(db_state, db_fields_guard);
        DB::remove_obsolete_files(db_state, db_fields_guard);
    }
}

/// Private methods
impl CompactionWorker {
    /**
    The primary entry point to start compaction.

    It re-checks some compaction pre-conditions and does some clean-up work at the end.
    */
    fn compaction_task(db_state: &PortableDatabaseState) {
        let mut db_fields_guard = db_state.guarded_db_fields.lock();

        if db_state.is_shutting_down.load(Ordering::Acquire) {
            log::info!(
                "Compaction thread discovered that the database was shutting down. Halting \
                compaction work."
            );
        } else if db_fields_guard.maybe_bad_database_state.is_some() {
            log::warn!(
                "Compaction thread discovered that the database was in a bad state. Halting \
                compaction work."
            );
        } else {
            CompactionWorker::coordinate_compaction(db_state, &mut db_fields_guard);
        }

        db_fields_guard.background_compaction_scheduled = false;

        // The previous compaction may have created too many files in a level, so check and
        // schedule a compaction if needed
        DB::maybe_schedule_compaction(db_state, &mut db_fields_guard);
        db_state.background_work_finished_signal.notify_all();
    }

    /**
    Performs the actual compaction tasks.

    A pending memtable flush takes priority. Otherwise a manual compaction or a size triggered
    compaction is run. Failures of these compactions are logged and the compaction is retried on
    the next trigger.
    */
    fn coordinate_compaction(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
    ) {
        if db_fields_guard.maybe_immutable_memtable.is_some() {
            log::info!(
                "Compaction thread found an immutable memtable to compact. Proceeding with \
                memtable compaction."
            );
            CompactionWorker::compact_memtable(db_state, db_fields_guard);
            return;
        }

        let mut change_manifest = VersionChangeManifest::default();
        let maybe_manual_range = db_fields_guard
            .maybe_manual_compaction
            .as_ref()
            .filter(|manual_compaction| !manual_compaction.is_done())
            .map(|manual_compaction| {
                (
                    manual_compaction.level(),
                    manual_compaction.remaining_range(),
                )
            });
        let is_manual = maybe_manual_range.is_some();

        let maybe_compaction = match maybe_manual_range {
            Some((level, key_range)) => {
                let maybe_compaction = db_fields_guard.version_set.compact_range(
                    level,
                    key_range.start.as_ref()..key_range.end.as_ref(),
                    &mut change_manifest,
                );
                CompactionWorker::advance_manual_compaction(
                    db_fields_guard,
                    maybe_compaction.as_ref(),
                );

                maybe_compaction
            }
            None => db_fields_guard
                .version_set
                .pick_compaction(&mut change_manifest),
        };

        let compaction = match maybe_compaction {
            Some(compaction) => compaction,
            None => {
                log::debug!("Compaction thread found nothing to compact.");
                return;
            }
        };

        let compaction_result = if !is_manual && compaction.is_trivial_move() {
            CompactionWorker::move_file_to_parent_level(
                db_state,
                db_fields_guard,
                &compaction,
                change_manifest,
            )
        } else {
            CompactionWorker::compact_files(db_state, db_fields_guard, compaction, change_manifest)
        };

        if let Err(compaction_err) = compaction_result {
            if db_state.is_shutting_down.load(Ordering::Acquire) {
                log::info!(
                    "Compaction was stopped because the database is shutting down. Error: {}",
                    compaction_err
                );
            } else {
                log::error!(
                    "Compaction failed and will be retried on the next trigger. Error: {}",
                    compaction_err
                );
            }

            if let MistDBError::CorruptBlock(corruption) = &compaction_err {
                DB::quarantine_table(db_state, db_fields_guard, corruption.file_number);
            }

            if is_manual {
                if let Some(manual_compaction) = db_fields_guard.maybe_manual_compaction.as_mut() {
                    manual_compaction.mark_done();
                }
            }
        }
    }

    /**
    Record the progress of a manual compaction.

    The manual compaction is done if there was nothing left to compact. Otherwise the next round
    starts after the largest key of the files that are about to be compacted.
    */
    fn advance_manual_compaction(
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        maybe_compaction: Option<&CompactionManifest>,
    ) {
        let manual_compaction = match db_fields_guard.maybe_manual_compaction.as_mut() {
            Some(manual_compaction) => manual_compaction,
            None => return,
        };

        let maybe_largest_input_key = maybe_compaction.and_then(|compaction| {
            compaction
                .get_compaction_level_files()
                .iter()
                .map(|file| file.largest_key())
                .max()
                .cloned()
        });
        if let Some(largest_key) = maybe_largest_input_key.as_ref() {
            log::info!(
                "Manual compaction at level {} is compacting up to user key {:?}.",
                manual_compaction.level(),
                largest_key.get_user_key()
            );
        }
        manual_compaction.record_round(maybe_largest_input_key);
    }

    /// Move a single file to the parent level without rewriting it.
    fn move_file_to_parent_level(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        compaction: &CompactionManifest,
        mut change_manifest: VersionChangeManifest,
    ) -> MistDBResult<()> {
        let level = compaction.level();
        let file = match compaction.get_compaction_level_files().first() {
            Some(file) => Arc::clone(file),
            None => return Ok(()),
        };

        change_manifest.remove_file(level, file.file_number());
        change_manifest.add_file(
            level + 1,
            file.file_number(),
            file.get_file_size(),
            file.smallest_key().clone()..file.largest_key().clone(),
        );
        db_fields_guard.version_set.log_and_apply(change_manifest)?;
        DB::install_read_state(db_state, db_fields_guard);

        log::info!(
            "Moved table file {} ({} bytes) from level {} to level {}.",
            file.file_number(),
            file.get_file_size(),
            level,
            level + 1
        );

        Ok(())
    }

    /**
    Merge the input files of the compaction into new files in the parent level.

    The lock is released while records are merged. It is re-acquired to hand out output file
    numbers, to flush the immutable memtable if one appears, and to install the result.
    */
    fn compact_files(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        compaction: CompactionManifest,
        mut change_manifest: VersionChangeManifest,
    ) -> MistDBResult<()> {
        log::info!(
            "Compacting {} files at level {} with {} files at level {}.",
            compaction.get_compaction_level_files().len(),
            compaction.level(),
            compaction.get_parent_level_files().len(),
            compaction.level() + 1
        );

        let newest_sequence_number = db_fields_guard.version_set.last_sequence_number();
        let input_iterators = compaction.make_input_iterators(&db_state.table_cache)?;
        let mut compaction_run =
            CompactionRun::new(compaction, MergingIterator::new(input_iterators), newest_sequence_number);

        let run_result = CompactionWorker::drive_compaction_run(
            db_state,
            db_fields_guard,
            &mut compaction_run,
        );
        let output_file_numbers: Vec<u64> = compaction_run.output_file_numbers().collect();
        if let Err(run_err) = run_result {
            compaction_run.abandon_current_output(db_state);
            for file_number in output_file_numbers {
                db_fields_guard.pending_outputs.remove(&file_number);
            }
            DB::remove_obsolete_files(db_state, db_fields_guard);

            return Err(run_err);
        }

        let CompactionRun {
            manifest: compaction,
            outputs,
            ..
        } = compaction_run;
        compaction.add_input_deletions(&mut change_manifest);
        let output_level = compaction.level() + 1;
        for output in outputs.iter() {
            change_manifest.add_file(
                output_level,
                output.file_number(),
                output.get_file_size(),
                output.smallest_key().clone()..output.largest_key().clone(),
            );
        }

        let apply_result = db_fields_guard.version_set.log_and_apply(change_manifest);
        for file_number in output_file_numbers {
            db_fields_guard.pending_outputs.remove(&file_number);
        }
        if apply_result.is_ok() {
            DB::install_read_state(db_state, db_fields_guard);
            log::info!(
                "Compacted level {} into {} files ({} bytes) at level {}.",
                compaction.level(),
                outputs.len(),
                outputs.iter().map(|output| output.get_file_size()).sum::<u64>(),
                output_level
            );
        }
        drop(compaction);
        DB::remove_obsolete_files(db_state, db_fields_guard);

        apply_result
    }

    /// Run the merge of a compaction, doing the steps that require the lock as they come up.
    fn drive_compaction_run(
        db_state: &PortableDatabaseState,
        db_fields_guard: &mut MutexGuard<GuardedDbFields>,
        compaction_run: &mut CompactionRun,
    ) -> MistDBResult<()> {
        MutexGuard::unlocked(db_fields_guard, || compaction_run.seek_to_first())?;

        loop {
            let step = MutexGuard::unlocked(db_fields_guard, || compaction_run.advance(db_state))?;
            match step {
                CompactionStep::Finished => break,
                CompactionStep::NeedsMemtableFlush => {
                    // Prioritize the memtable flush so that writers are not stalled
                    CompactionWorker::compact_memtable(db_state, db_fields_guard);
                    db_state.background_work_finished_signal.notify_all();
                    if let Some(bad_state_err) = db_fields_guard.maybe_bad_database_state.as_ref()
                    {
                        return Err(bad_state_err.clone());
                    }
                }
                CompactionStep::NeedsOutputFile => {
                    let file_number = db_fields_guard.version_set.get_new_file_number();
                    db_fields_guard.pending_outputs.insert(file_number);
                    compaction_run.open_output(db_state, file_number)?;
                }
            }
        }

        MutexGuard::unlocked(db_fields_guard, || compaction_run.finish_current_output(db_state))
    }
}

impl fmt::Debug for CompactionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionWorker")
            .field(
                "is_running",
                &self.maybe_background_compaction_handle.is_some(),
            )
            .finish()
    }
}

/// The reasons that a [`CompactionRun`] pauses.
#[derive(Debug, Eq, PartialEq)]
enum CompactionStep {
    /// Every input record was processed.
    Finished,

    /// A record must be written but there is no output file to write it to.
    NeedsOutputFile,

    /// An immutable memtable is waiting to be flushed.
    NeedsMemtableFlush,
}

/// A table file being written by a compaction.
struct CompactionOutput {
    /// The number of the file being written.
    file_number: u64,

    /// The builder of the file.
    table_builder: TableBuilder,

    /// The first key written to the file.
    maybe_smallest_key: Option<InternalKey>,

    /// The last key written to the file.
    maybe_largest_key: Option<InternalKey>,
}

/// The progress of the merge step of a compaction.
struct CompactionRun {
    /// Describes the compaction being performed.
    manifest: CompactionManifest,

    /// Merges the records of every input file.
    merged: MergingIterator,

    /**
    The largest sequence number in use when the compaction started.

    Every input record is at or below this so the newest record of each user key is the only one
    that can still be read.
    */
    newest_sequence_number: u64,

    /// The user key of the last record that was processed.
    maybe_last_user_key: Option<Vec<u8>>,

    /// The sequence number of the previous record of the same user key.
    last_sequence_for_key: u64,

    /// A record that was kept but could not be written because there was no output file.
    maybe_pending_record: Option<(InternalKey, Vec<u8>)>,

    /// The output file currently being written.
    maybe_current_output: Option<CompactionOutput>,

    /// The finished output files.
    outputs: Vec<FileMetadata>,
}

impl CompactionRun {
    fn new(
        manifest: CompactionManifest,
        merged: MergingIterator,
        newest_sequence_number: u64,
    ) -> Self {
        Self {
            manifest,
            merged,
            newest_sequence_number,
            maybe_last_user_key: None,
            last_sequence_for_key: MAX_SEQUENCE_NUMBER,
            maybe_pending_record: None,
            maybe_current_output: None,
            outputs: vec![],
        }
    }

    fn seek_to_first(&mut self) -> MistDBResult<()> {
        self.merged.seek_to_first()?;
        if let Some(merge_err) = self.merged.take_error() {
            return Err(merge_err);
        }

        Ok(())
    }

    /// Get the numbers of the finished output files and of the file being written.
    fn output_file_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.outputs
            .iter()
            .map(|output| output.file_number())
            .chain(
                self.maybe_current_output
                    .as_ref()
                    .map(|output| output.file_number),
            )
    }

    /**
    Process input records until the run finishes or needs something done while holding the
    database lock.
    */
    fn advance(&mut self, db_state: &PortableDatabaseState) -> MistDBResult<CompactionStep> {
        if let Some((key, value)) = self.maybe_pending_record.take() {
            match self.maybe_current_output.as_mut() {
                Some(output) => {
                    CompactionRun::add_to_output(output, &key, &value)?;
                    self.merged.next();
                    self.maybe_finish_full_output(db_state)?;
                }
                None => {
                    self.maybe_pending_record = Some((key, value));
                    return Ok(CompactionStep::NeedsOutputFile);
                }
            }
        }

        loop {
            if db_state.has_immutable_memtable.load(Ordering::Acquire) {
                return Ok(CompactionStep::NeedsMemtableFlush);
            }

            if db_state.is_shutting_down.load(Ordering::Acquire) {
                return Err(MistDBError::Compaction(
                    CompactionWorkerError::UnexpectedState(
                        "The database is shutting down.".to_string(),
                    ),
                ));
            }

            let (key, value) = match self.merged.current() {
                Some((key, value)) => (key.clone(), value.clone()),
                None => break,
            };

            if self.manifest.should_stop_before(&key) && self.maybe_current_output.is_some() {
                self.finish_current_output(db_state)?;
            }

            if self.should_drop(&key) {
                self.merged.next();
                continue;
            }

            match self.maybe_current_output.as_mut() {
                Some(output) => {
                    CompactionRun::add_to_output(output, &key, &value)?;
                    self.merged.next();
                    self.maybe_finish_full_output(db_state)?;
                }
                None => {
                    self.maybe_pending_record = Some((key, value));
                    return Ok(CompactionStep::NeedsOutputFile);
                }
            }
        }

        if let Some(merge_err) = self.merged.take_error() {
            return Err(merge_err);
        }

        Ok(CompactionStep::Finished)
    }

    /**
    Returns true if the record can be discarded.

    A record is dropped when a newer record of the same user key was already seen. A tombstone is
    dropped when no older level can hold a record for its user key.
    */
    fn should_drop(&mut self, key: &InternalKey) -> bool {
        let is_new_user_key = self
            .maybe_last_user_key
            .as_deref()
            .map_or(true, |last_user_key| last_user_key != key.get_user_key());
        if is_new_user_key {
            self.maybe_last_user_key = Some(key.get_user_key().to_vec());
            self.last_sequence_for_key = MAX_SEQUENCE_NUMBER;
        }

        let should_drop = if self.last_sequence_for_key <= self.newest_sequence_number {
            // Hidden by a newer record for the same user key
            true
        } else {
            key.get_operation() == Operation::Delete
                && key.get_sequence_number() <= self.newest_sequence_number
                && self.manifest.is_base_level_for_key(key.get_user_key())
        };
        self.last_sequence_for_key = key.get_sequence_number();

        should_drop
    }

    fn add_to_output(
        output: &mut CompactionOutput,
        key: &InternalKey,
        value: &[u8],
    ) -> MistDBResult<()> {
        output.table_builder.add_entry(key, value)?;
        if output.maybe_smallest_key.is_none() {
            output.maybe_smallest_key = Some(key.clone());
        }
        output.maybe_largest_key = Some(key.clone());

        Ok(())
    }

    /// Finish the current output file if it has reached the maximum file size.
    fn maybe_finish_full_output(&mut self, db_state: &PortableDatabaseState) -> MistDBResult<()> {
        let is_full = self.maybe_current_output.as_ref().map_or(false, |output| {
            output.table_builder.approximate_file_size()
                >= self.manifest.max_output_file_size_bytes()
        });
        if is_full {
            self.finish_current_output(db_state)?;
        }

        Ok(())
    }

    /// Start writing a new output file.
    fn open_output(
        &mut self,
        db_state: &PortableDatabaseState,
        file_number: u64,
    ) -> MistDBResult<()> {
        let table_path = db_state.file_name_handler.get_table_file_path(file_number);
        let table_builder = TableBuilder::new(
            &db_state.options,
            db_state.options.filesystem_provider(),
            table_path,
            file_number,
        )?;
        self.maybe_current_output = Some(CompactionOutput {
            file_number,
            table_builder,
            maybe_smallest_key: None,
            maybe_largest_key: None,
        });

        Ok(())
    }

    /**
    Finalize the current output file, if any, and check that it can be read back.
    */
    fn finish_current_output(&mut self, db_state: &PortableDatabaseState) -> MistDBResult<()> {
        let mut output = match self.maybe_current_output.take() {
            Some(output) => output,
            None => return Ok(()),
        };

        let (smallest_key, largest_key) =
            match (output.maybe_smallest_key.take(), output.maybe_largest_key.take()) {
                (Some(smallest_key), Some(largest_key)) => (smallest_key, largest_key),
                _ => {
                    // Nothing was written to the file
                    output.table_builder.abandon();
                    remove_output_file(db_state, output.file_number);
                    return Ok(());
                }
            };

        if let Err(finalize_err) = output.table_builder.finalize() {
            self.maybe_current_output = Some(output);
            return Err(finalize_err.into());
        }

        // Verify that the table is usable
        db_state.table_cache.find_table(output.file_number)?;

        log::info!(
            "Compaction output table file {} was created with {} entries and {} bytes.",
            output.file_number,
            output.table_builder.get_num_entries(),
            output.table_builder.file_size()
        );
        self.outputs.push(FileMetadata::new(
            output.file_number,
            output.table_builder.file_size(),
            smallest_key,
            largest_key,
        ));

        Ok(())
    }

    /// Stop writing the current output file after a failure.
    fn abandon_current_output(&mut self, db_state: &PortableDatabaseState) {
        if let Some(mut output) = self.maybe_current_output.take() {
            output.table_builder.abandon();
            remove_output_file(db_state, output.file_number);
        }
    }
}

/// Delete the table file of an output that will not be installed.
pub(crate) fn remove_output_file(db_state: &PortableDatabaseState, file_number: u64) {
    let table_path = db_state.file_name_handler.get_table_file_path(file_number);
    if let Err(remove_err) = db_state
        .options
        .filesystem_provider()
        .remove_file(&table_path)
    {
        log::warn!(
            "Failed to remove unused compaction output {:?}. Error: {}",
            table_path,
            remove_err
        );
    }
}
