use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::config::MAX_NUM_LEVELS;
use crate::errors::{MistDBError, MistDBResult};
use crate::key::InternalKey;
use crate::utils::comparator::Comparator;

use super::file_metadata::{FileMetadata, FileMetadataBySmallestKey};
use super::version::Version;
use super::version_manifest::{DeletedFile, VersionChangeManifest};

/**
Accumulates changes from multiple change manifests to apply to a base version and generate a
new version.
*/
pub(crate) struct VersionBuilder {
    /// The base version to apply on top of.
    base_version: Arc<Version>,

    /// File numbers to drop from each level.
    deleted_files: [HashSet<u64>; MAX_NUM_LEVELS],

    /// Files to add to each level. A file number appears at most once per level.
    added_files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /// Aggregated per-level keys at which the next compaction at that level should start.
    compaction_pointers: [Option<InternalKey>; MAX_NUM_LEVELS],

    /**
    Indicates if the builder has already been used to apply its stored changes.

    Changes stored in a builder cannot be applied multiple times.
    */
    already_invoked: bool,
}

/// Crate-only methods
impl VersionBuilder {
    /// Create a new instance of [`VersionBuilder`].
    pub(crate) fn new(base_version: Arc<Version>) -> Self {
        Self {
            base_version,
            deleted_files: Default::default(),
            added_files: Default::default(),
            compaction_pointers: Default::default(),
            already_invoked: false,
        }
    }

    /**
    Accumulate changes from multiple change manifests.

    This is so that a sequence of changes can be applied atomically to a base version.
    */
    pub(crate) fn accumulate_changes(&mut self, change_manifest: &VersionChangeManifest) {
        for (level, key) in change_manifest.compaction_pointers.iter() {
            self.compaction_pointers[*level] = Some(key.clone());
        }

        for DeletedFile { level, file_number } in change_manifest.deleted_files.iter() {
            self.deleted_files[*level].insert(*file_number);
            self.added_files[*level].retain(|file| file.file_number() != *file_number);
        }

        for (level, file) in change_manifest.new_files.iter() {
            self.deleted_files[*level].remove(&file.file_number());
            self.added_files[*level].retain(|added| added.file_number() != file.file_number());
            self.added_files[*level].push(Arc::new(file.clone()));
        }
    }

    /**
    Apply the accumulated changes on the base version, returning a new [`Version`].

    This method will also update the specified version set compaction pointers.

    **A builder can not be called again after invoking this method.**

    # Errors

    Returns [`MistDBError::BadDatabaseState`] if the builder was already invoked or if the changes
    would leave files with overlapping key ranges at a level > 0.
    */
    pub(crate) fn apply_changes(
        &mut self,
        last_sequence_number: u64,
        wal_file_number: u64,
        vset_compaction_pointers: &mut [Option<InternalKey>; MAX_NUM_LEVELS],
    ) -> MistDBResult<Version> {
        if self.already_invoked {
            return Err(MistDBError::BadDatabaseState(
                "Cannot apply the changes of a version builder more than once.".to_string(),
            ));
        }
        self.already_invoked = true;

        for (level, ptr) in self.compaction_pointers.iter_mut().enumerate() {
            if ptr.is_some() {
                vset_compaction_pointers[level] = ptr.take();
            }
        }

        let base = Arc::clone(&self.base_version);
        let mut new_version = base.new_from_current(last_sequence_number, wal_file_number);
        for level in 0..MAX_NUM_LEVELS {
            let mut merged_files: Vec<Arc<FileMetadata>> = base.files[level]
                .iter()
                .chain(self.added_files[level].iter())
                .filter(|file| !self.deleted_files[level].contains(&file.file_number()))
                .cloned()
                .collect();

            // Level 0 files keep the order they were added in. File numbers only grow so this is
            // also the age order of the files.
            if level == 0 {
                let mut seen_file_numbers: BTreeSet<u64> = BTreeSet::new();
                merged_files.retain(|file| seen_file_numbers.insert(file.file_number()));
            } else {
                merged_files.sort_by(|a, b| FileMetadataBySmallestKey::compare(a, b));
                merged_files.dedup_by_key(|file| file.file_number());
                VersionBuilder::check_for_overlaps(level, &merged_files)?;
            }

            new_version.files[level] = merged_files;
        }

        Ok(new_version)
    }
}

/// Private methods
impl VersionBuilder {
    /// Check that the sorted files of a level > 0 have disjoint key ranges.
    fn check_for_overlaps(level: usize, files: &[Arc<FileMetadata>]) -> MistDBResult<()> {
        for window in files.windows(2) {
            let (previous_file, file) = (&window[0], &window[1]);
            if previous_file.largest_key() >= file.smallest_key() {
                let error_msg = format!(
                    "Attempting to add file number {} to level {} created an overlap with file \
                    number {}.",
                    file.file_number(),
                    level,
                    previous_file.file_number()
                );
                log::error!("{}", error_msg);

                return Err(MistDBError::BadDatabaseState(error_msg));
            }
        }

        Ok(())
    }
}
