use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Weak};

use crate::compaction::manifest::CompactionManifest;
use crate::config::MAX_NUM_LEVELS;
use crate::errors::{MistDBError, MistDBResult};
use crate::file_names::{FileNameHandler, ParsedFileType};
use crate::fs::FileSystem;
use crate::key::InternalKey;
use crate::logs::{LogReader, LogWriter};
use crate::DbOptions;

use super::errors::WriteResult;
use super::version::Version;
use super::version_builder::VersionBuilder;
use super::version_manifest::VersionChangeManifest;

/**
Manages the versions of the database.

The version set owns the manifest file, the counters for file numbers and sequence numbers, and the
per-level compaction pointers.
*/
#[derive(Debug)]
pub(crate) struct VersionSet {
    /// Database options to refer to when reading the table file.
    options: DbOptions,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,

    /// Handler for file names used by the database.
    file_name_handler: Arc<FileNameHandler>,

    /**
    The next file number to hand out.

    File numbers are shared by write-ahead logs, table files, manifest files and temporary files.
    */
    next_file_number: u64,

    /// The current manifest file number.
    manifest_file_number: u64,

    /**
    The most recently used sequence number for an operation.

    This is a counter that is incremented as new operations are executed.
    */
    last_sequence_number: u64,

    /**
    The number of the oldest write-ahead log that may still hold records not yet persisted to a
    table file.
    */
    wal_file_number: u64,

    /// The most up to date version.
    current_version: Arc<Version>,

    /**
    Versions that were installed at some point. Versions that are still pinned by a reader are
    kept alive so that their table files are not removed.
    */
    live_versions: Vec<Weak<Version>>,

    /**
    Per-level keys at which the next size compaction at that level should start.
    */
    compaction_pointers: [Option<InternalKey>; MAX_NUM_LEVELS],

    /// The writer for the manifest file. This is only populated once a version change is logged.
    maybe_manifest_writer: Option<LogWriter>,
}

/// Crate-only methods
impl VersionSet {
    /// Create a new instance of [`VersionSet`].
    pub(crate) fn new(options: DbOptions, file_name_handler: Arc<FileNameHandler>) -> Self {
        let filesystem_provider = options.filesystem_provider();
        let current_version = Arc::new(Version::new(options.clone(), 0, 0));
        let live_versions = vec![Arc::downgrade(&current_version)];

        Self {
            options,
            filesystem_provider,
            file_name_handler,
            next_file_number: 2,
            // This will be updated by [`VersionSet::recover`]
            manifest_file_number: 0,
            last_sequence_number: 0,
            wal_file_number: 0,
            current_version,
            live_versions,
            compaction_pointers: Default::default(),
            maybe_manifest_writer: None,
        }
    }

    /**
    Write the initial manifest of an empty database and point the `CURRENT` file at it.
    */
    pub(crate) fn create_new_database(&mut self) -> MistDBResult<()> {
        let change_manifest = VersionChangeManifest {
            wal_file_number: Some(0),
            next_file_number: Some(2),
            last_sequence_number: Some(0),
            ..VersionChangeManifest::default()
        };
        self.manifest_file_number = 1;

        let manifest_path = self
            .file_name_handler
            .get_manifest_file_path(self.manifest_file_number);
        log::info!(
            "Creating a new database with a manifest file at {:?}.",
            manifest_path
        );
        let write_result = (|| -> WriteResult<()> {
            let mut manifest_writer =
                LogWriter::new(Arc::clone(&self.filesystem_provider), &manifest_path, false)?;
            manifest_writer.append(&Vec::<u8>::from(&change_manifest))?;
            manifest_writer.sync()?;

            self.set_current_file()
        })();

        if let Err(write_err) = write_result {
            log::error!(
                "Failed to create the initial manifest file. Error: {}",
                write_err
            );
            self.remove_file_after_failure(&manifest_path);

            return Err(MistDBError::Open(write_err.to_string()));
        }

        Ok(())
    }

    /**
    Recover the version state that was last persisted to the manifest named by the `CURRENT` file.

    A truncated final manifest record is treated as the end of the manifest. Any other corruption
    fails recovery. A new manifest file is always started by the next call to
    [`VersionSet::log_and_apply`].
    */
    pub(crate) fn recover(&mut self) -> MistDBResult<()> {
        let manifest_path = self.read_current_file()?;
        log::info!("Recovering version state from {:?}.", manifest_path);

        let mut manifest_reader =
            LogReader::new(Arc::clone(&self.filesystem_provider), &manifest_path).map_err(
                |err| MistDBError::Open(format!("Failed to open the manifest file. {}", err)),
            )?;
        let mut builder = VersionBuilder::new(Arc::clone(&self.current_version));
        let mut maybe_wal_file_number: Option<u64> = None;
        let mut maybe_next_file_number: Option<u64> = None;
        let mut maybe_last_sequence_number: Option<u64> = None;
        let mut num_records: usize = 0;
        loop {
            let record = match manifest_reader.read_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(read_err) => {
                    return Err(MistDBError::Open(format!(
                        "The manifest file is corrupt. {}",
                        read_err
                    )));
                }
            };

            let change_manifest = VersionChangeManifest::try_from(record.as_slice())
                .map_err(|err| MistDBError::Open(format!("Failed to parse a manifest record. {}", err)))?;
            builder.accumulate_changes(&change_manifest);
            num_records += 1;

            if change_manifest.wal_file_number.is_some() {
                maybe_wal_file_number = change_manifest.wal_file_number;
            }
            if change_manifest.next_file_number.is_some() {
                maybe_next_file_number = change_manifest.next_file_number;
            }
            if change_manifest.last_sequence_number.is_some() {
                maybe_last_sequence_number = change_manifest.last_sequence_number;
            }
        }

        if manifest_reader.bytes_dropped() > 0 {
            log::warn!(
                "Dropped {} bytes from the tail of the manifest file.",
                manifest_reader.bytes_dropped()
            );
        }

        let (wal_file_number, next_file_number, last_sequence_number) = match (
            maybe_wal_file_number,
            maybe_next_file_number,
            maybe_last_sequence_number,
        ) {
            (Some(wal), Some(next), Some(last)) => (wal, next, last),
            (None, _, _) => {
                return Err(MistDBError::Open(
                    "The manifest does not record a write-ahead log number.".to_string(),
                ))
            }
            (_, None, _) => {
                return Err(MistDBError::Open(
                    "The manifest does not record the next file number.".to_string(),
                ))
            }
            (_, _, None) => {
                return Err(MistDBError::Open(
                    "The manifest does not record the last sequence number.".to_string(),
                ))
            }
        };

        let mut version = builder
            .apply_changes(
                last_sequence_number,
                wal_file_number,
                &mut self.compaction_pointers,
            )
            .map_err(|err| MistDBError::Open(err.to_string()))?;
        version.finalize();
        self.install_version(version);

        self.next_file_number = next_file_number;
        self.mark_file_number_used(wal_file_number);
        self.manifest_file_number = self.get_new_file_number();
        self.last_sequence_number = last_sequence_number;
        self.wal_file_number = wal_file_number;

        log::info!(
            "Recovered {} manifest records. Next file number: {}, last sequence number: {}, \
            write-ahead log number: {}.",
            num_records,
            self.next_file_number,
            self.last_sequence_number,
            self.wal_file_number
        );

        Ok(())
    }

    /**
    Apply `change_manifest` to the current version to form a new version, persist the change to
    the manifest, and install the new version as the current version.

    The first call after a [`VersionSet::recover`] creates a fresh manifest that starts with a
    snapshot of the current version and then points the `CURRENT` file at it.
    */
    pub(crate) fn log_and_apply(
        &mut self,
        mut change_manifest: VersionChangeManifest,
    ) -> MistDBResult<()> {
        match change_manifest.wal_file_number {
            Some(wal_number)
                if wal_number < self.wal_file_number || wal_number >= self.next_file_number =>
            {
                return Err(MistDBError::BadDatabaseState(format!(
                    "Attempted to record write-ahead log number {} which is outside of the valid \
                    range [{}, {}).",
                    wal_number, self.wal_file_number, self.next_file_number
                )));
            }
            Some(_) => {}
            None => change_manifest.wal_file_number = Some(self.wal_file_number),
        }
        change_manifest.next_file_number = Some(self.next_file_number);
        change_manifest.last_sequence_number = Some(self.last_sequence_number);
        let wal_file_number = change_manifest.wal_file_number.unwrap_or(self.wal_file_number);

        let mut builder = VersionBuilder::new(Arc::clone(&self.current_version));
        builder.accumulate_changes(&change_manifest);
        let mut new_version = builder.apply_changes(
            self.last_sequence_number,
            wal_file_number,
            &mut self.compaction_pointers,
        )?;
        new_version.finalize();

        let is_new_manifest = self.maybe_manifest_writer.is_none();
        if let Err(write_err) = self.write_to_manifest(&change_manifest) {
            log::error!(
                "Failed to persist a version change to the manifest. Error: {}",
                write_err
            );

            if is_new_manifest {
                self.maybe_manifest_writer = None;
                let manifest_path = self
                    .file_name_handler
                    .get_manifest_file_path(self.manifest_file_number);
                self.remove_file_after_failure(&manifest_path);
            }

            return Err(write_err.into());
        }

        self.install_version(new_version);
        self.wal_file_number = wal_file_number;

        Ok(())
    }

    /// Get a new file number.
    pub(crate) fn get_new_file_number(&mut self) -> u64 {
        let file_number = self.next_file_number;
        self.next_file_number += 1;

        file_number
    }

    /**
    Reuse a file number.

    We reuse file numbers in cases like when a we fail to create a file. This helps to avoid
    exhausting the file number space.

    **NOTE** The number being reused must have been obtained via [`VersionSet::get_new_file_number`].
    */
    pub(crate) fn reuse_file_number(&mut self, file_number: u64) {
        // If the provided file number is the one that was just handed out we can perform the
        // reverse operation.
        if self.next_file_number == file_number + 1 {
            self.next_file_number = file_number;
        }
    }

    /// Ensure that the specified file number is never handed out again.
    pub(crate) fn mark_file_number_used(&mut self, file_number: u64) {
        if self.next_file_number <= file_number {
            self.next_file_number = file_number + 1;
        }
    }

    /// Get the most recently used sequence number.
    pub(crate) fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// Set the most recently used sequence number.
    pub(crate) fn set_last_sequence_number(&mut self, sequence_number: u64) {
        self.last_sequence_number = sequence_number;
    }

    /// Get the number of the oldest write-ahead log that has not been persisted to a table.
    pub(crate) fn wal_file_number(&self) -> u64 {
        self.wal_file_number
    }

    /// Get the number of the manifest file currently in use.
    pub(crate) fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Get a reference to the current version.
    pub(crate) fn get_current_version(&self) -> Arc<Version> {
        Arc::clone(&self.current_version)
    }

    /// Returns true if a level on the current version needs compaction.
    pub(crate) fn needs_compaction(&self) -> bool {
        self.current_version.requires_size_compaction()
    }

    /// Return the number of table files at the specified level in the current version.
    pub(crate) fn num_files_at_level(&self, level: usize) -> usize {
        self.current_version.num_files_at_level(level)
    }

    /**
    Get the file numbers of every table referenced by a version that is still alive.

    Dead versions are pruned as a side effect.
    */
    pub(crate) fn live_files(&mut self) -> HashSet<u64> {
        let mut live_files: HashSet<u64> = HashSet::new();
        self.live_versions.retain(|maybe_version| {
            match maybe_version.upgrade() {
                Some(version) => {
                    live_files.extend(version.file_numbers());
                    true
                }
                None => false,
            }
        });

        live_files
    }

    /**
    Pick a level and the inputs for a new size triggered compaction.

    Returns `None` if the current version does not require a compaction.
    */
    pub(crate) fn pick_compaction(
        &self,
        change_manifest: &mut VersionChangeManifest,
    ) -> Option<CompactionManifest> {
        let current_version = Arc::clone(&self.current_version);
        if !current_version.requires_size_compaction() {
            return None;
        }

        let level = current_version.get_size_compaction_metadata()?.compaction_level;
        let level_files = &current_version.files[level];

        // Pick the first file that comes after the compaction pointer for the level. Wrap around
        // to the beginning of the key space if there is no such file.
        let maybe_file_after_pointer = self.compaction_pointers[level]
            .as_ref()
            .and_then(|pointer| {
                level_files
                    .iter()
                    .find(|file| file.largest_key() > pointer)
            });
        let file_to_compact = maybe_file_after_pointer.or_else(|| level_files.first())?;

        let mut files_to_compact = vec![Arc::clone(file_to_compact)];
        if level == 0 {
            // Level 0 files can overlap each other so pick up every file that overlaps the chosen
            // file
            let smallest_key = file_to_compact.smallest_key().clone();
            let largest_key = file_to_compact.largest_key().clone();
            files_to_compact = current_version
                .get_overlapping_compaction_inputs(0, Some(&smallest_key)..Some(&largest_key));
        }

        let mut compaction_manifest =
            CompactionManifest::new(&self.options, level, Arc::clone(&current_version));
        compaction_manifest.set_compaction_level_files(files_to_compact);
        compaction_manifest.finalize_compaction_inputs(change_manifest);

        Some(compaction_manifest)
    }

    /**
    Create a compaction for the files in `level` that overlap the specified key range. An unbounded
    side of the range is represented by `None`.

    Returns `None` if no file at the level overlaps the range.
    */
    pub(crate) fn compact_range(
        &self,
        level: usize,
        key_range: std::ops::Range<Option<&InternalKey>>,
        change_manifest: &mut VersionChangeManifest,
    ) -> Option<CompactionManifest> {
        let current_version = Arc::clone(&self.current_version);
        let mut files_to_compact =
            current_version.get_overlapping_compaction_inputs(level, key_range);
        if files_to_compact.is_empty() {
            return None;
        }

        // Avoid compacting too much in one shot in case the range is large. Level 0 files cannot
        // be truncated because they may overlap each other.
        if level > 0 {
            let max_compaction_bytes = self.options.max_file_size as u64;
            let mut total_bytes: u64 = 0;
            let mut num_files_to_keep = files_to_compact.len();
            for (index, file) in files_to_compact.iter().enumerate() {
                total_bytes += file.get_file_size();
                if total_bytes >= max_compaction_bytes {
                    num_files_to_keep = index + 1;
                    break;
                }
            }
            files_to_compact.truncate(num_files_to_keep);
        }

        let mut compaction_manifest =
            CompactionManifest::new(&self.options, level, Arc::clone(&current_version));
        compaction_manifest.set_compaction_level_files(files_to_compact);
        compaction_manifest.finalize_compaction_inputs(change_manifest);

        Some(compaction_manifest)
    }
}

/// Private methods
impl VersionSet {
    /// Make `version` the current version and track it as a live version.
    fn install_version(&mut self, version: Version) {
        let new_version = Arc::new(version);
        self.live_versions
            .retain(|maybe_version| maybe_version.strong_count() > 0);
        self.live_versions.push(Arc::downgrade(&new_version));
        log::debug!(
            "Installed a version at sequence number {} using write-ahead log {}. Files per level: \
            {:?}",
            new_version.last_sequence_number(),
            new_version.wal_file_number(),
            (0..MAX_NUM_LEVELS)
                .map(|level| new_version.num_files_at_level(level))
                .collect::<Vec<usize>>()
        );
        self.current_version = new_version;
    }

    /// Remove a file left behind by a failed write. Failures are only logged.
    fn remove_file_after_failure(&self, path: &Path) {
        if let Err(remove_err) = self.filesystem_provider.remove_file(path) {
            log::warn!("Failed to remove {:?}. Error: {}", path, remove_err);
        }
    }

    /// Read the `CURRENT` file and resolve the path of the manifest file that it names.
    fn read_current_file(&self) -> MistDBResult<std::path::PathBuf> {
        let current_path = self.file_name_handler.get_current_file_path();
        let mut contents = String::new();
        self.filesystem_provider
            .open_file(&current_path)
            .and_then(|mut current_file| current_file.read_to_string(&mut contents))
            .map_err(|err| {
                MistDBError::Open(format!("Failed to read the CURRENT file. {}", err))
            })?;

        let manifest_name = match contents.strip_suffix('\n') {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(MistDBError::Open(
                    "The CURRENT file is not terminated by a newline.".to_string(),
                ))
            }
        };

        match FileNameHandler::parse_file_name(Path::new(manifest_name)) {
            Some(ParsedFileType::ManifestFile(manifest_number)) => Ok(self
                .file_name_handler
                .get_manifest_file_path(manifest_number)),
            _ => Err(MistDBError::Open(format!(
                "The CURRENT file names an invalid manifest file: {}",
                manifest_name
            ))),
        }
    }

    /**
    Write a record to the manifest, creating a new manifest file first if there is no manifest
    writer yet.
    */
    fn write_to_manifest(&mut self, change_manifest: &VersionChangeManifest) -> WriteResult<()> {
        let is_new_manifest = self.maybe_manifest_writer.is_none();
        if is_new_manifest {
            let manifest_path = self
                .file_name_handler
                .get_manifest_file_path(self.manifest_file_number);
            let mut manifest_writer =
                LogWriter::new(Arc::clone(&self.filesystem_provider), manifest_path, false)?;
            manifest_writer.append(&Vec::<u8>::from(&self.snapshot_current_version()))?;
            self.maybe_manifest_writer = Some(manifest_writer);
        }

        if let Some(manifest_writer) = self.maybe_manifest_writer.as_mut() {
            manifest_writer.append(&Vec::<u8>::from(change_manifest))?;
            manifest_writer.sync()?;
        }

        if is_new_manifest {
            self.set_current_file()?;
        }

        Ok(())
    }

    /**
    Create a change manifest that reproduces the current version's files and the compaction
    pointers when applied to an empty version.
    */
    fn snapshot_current_version(&self) -> VersionChangeManifest {
        let mut snapshot = VersionChangeManifest::default();
        for (level, maybe_pointer) in self.compaction_pointers.iter().enumerate() {
            if let Some(pointer) = maybe_pointer {
                snapshot.add_compaction_pointer(level, pointer.clone());
            }
        }

        for (level, files) in self.current_version.files.iter().enumerate() {
            for file in files {
                snapshot.add_file(
                    level,
                    file.file_number(),
                    file.get_file_size(),
                    file.smallest_key().clone()..file.largest_key().clone(),
                );
            }
        }

        snapshot
    }

    /**
    Point the `CURRENT` file at the manifest file in use.

    The new contents are written to a temporary file which is then renamed over `CURRENT`.
    */
    fn set_current_file(&self) -> WriteResult<()> {
        let temp_path = self
            .file_name_handler
            .get_temp_file_path(self.manifest_file_number);
        let write_result = (|| -> WriteResult<()> {
            let mut temp_file = self.filesystem_provider.create_file(&temp_path, false)?;
            temp_file.write_all(
                format!(
                    "{}\n",
                    FileNameHandler::get_manifest_file_name(self.manifest_file_number)
                )
                .as_bytes(),
            )?;
            temp_file.sync()?;

            self.filesystem_provider
                .rename(&temp_path, &self.file_name_handler.get_current_file_path())?;

            Ok(())
        })();

        if write_result.is_err() {
            self.remove_file_after_failure(&temp_path);
        }

        write_result
    }
}
