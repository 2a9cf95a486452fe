use std::fmt;
use std::sync::Arc;

use crate::config::MAX_NUM_LEVELS;
use crate::errors::MistDBResult;
use crate::iterator::BoxedInternalIterator;
use crate::key::InternalKey;
use crate::table_cache::TableCache;
use crate::versioning::file_iterators::FilesEntryIterator;
use crate::versioning::file_metadata::FileMetadata;
use crate::versioning::version::Version;
use crate::versioning::{self, VersionChangeManifest};
use crate::DbOptions;

use super::utils;

/**
Encapsulates information about how a compaction should be performed.
*/
pub(crate) struct CompactionManifest {
    /// The level that is currently being compacted.
    level: usize,

    /// The maximum size for files created during this compaction.
    max_output_file_size_bytes: u64,

    /// The maximum number of grandparent bytes a single output file may overlap.
    max_grandparent_overlap_bytes: u64,

    /// The maximum combined size of the inputs when growing the inputs of the compaction level.
    expanded_compaction_byte_size_limit: u64,

    /// The version to perform a compaction for.
    input_version: Arc<Version>,

    /**
    The files being compacted.

    Files from `level` are read in for compaction and stored at index 0. Files overlapping the key
    range of the files from `level` are read in from `level` + 1 and stored at index 1. We say that
    files in `level` are compacted to a parent level at `level` + 1.
    */
    input_files: [Vec<Arc<FileMetadata>>; 2],

    /// The set of files in the grandparent level that overlap the files involved in the compaction.
    grandparent_files: Vec<Arc<FileMetadata>>,

    /// Index into `grandparent_files` used to track overlap with the output file being built.
    grandparent_index: usize,

    /// Set to true once a key has been checked against the grandparent files.
    seen_key: bool,

    /// The number of grandparent bytes overlapped by the output file being built.
    overlapped_bytes: u64,

    /**
    Indices into the files of the input version per level, recording the position reached by
    [`CompactionManifest::is_base_level_for_key`].

    Pointers are only used for levels older than the levels being used in the compaction, i.e.
    for all levels >= `level` + 2.
    */
    level_pointers: [usize; MAX_NUM_LEVELS],
}

/// Crate-only methods
impl CompactionManifest {
    /// Create a new [`CompactionManifest`] compacting `level_to_compact` of `input_version`.
    pub(crate) fn new(
        options: &DbOptions,
        level_to_compact: usize,
        input_version: Arc<Version>,
    ) -> Self {
        Self {
            level: level_to_compact,
            max_output_file_size_bytes: options.max_file_size as u64,
            max_grandparent_overlap_bytes: utils::max_grandparent_overlap_bytes_from_options(
                options,
            ),
            expanded_compaction_byte_size_limit: utils::expanded_compaction_byte_size_limit(
                options,
            ),
            input_version,
            input_files: Default::default(),
            grandparent_files: vec![],
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_pointers: [0; MAX_NUM_LEVELS],
        }
    }

    /// Get the level being compacted.
    pub(crate) fn level(&self) -> usize {
        self.level
    }

    /// Get the maximum size of an output file.
    pub(crate) fn max_output_file_size_bytes(&self) -> u64 {
        self.max_output_file_size_bytes
    }

    /// Set files to compact for the manifest's specified `level`.
    pub(crate) fn set_compaction_level_files(&mut self, files_to_compact: Vec<Arc<FileMetadata>>) {
        self.input_files[0] = files_to_compact;
    }

    /// Get a reference to the set of files involved at the compaction level.
    pub(crate) fn get_compaction_level_files(&self) -> &[Arc<FileMetadata>] {
        &self.input_files[0]
    }

    /// Get a reference to the set of files involved at the parent level.
    pub(crate) fn get_parent_level_files(&self) -> &[Arc<FileMetadata>] {
        &self.input_files[1]
    }

    /**
    Fill out other compaction input fields based on the currently provided set of inputs.

    # Return

    This method returns the key that the next compaction for this level should start after. The
    key is also recorded as a compaction pointer in `change_manifest`.
    */
    pub(crate) fn finalize_compaction_inputs(
        &mut self,
        change_manifest: &mut VersionChangeManifest,
    ) -> Option<InternalKey> {
        let input_version = Arc::clone(&self.input_version);
        let level_files = &input_version.files[self.level];
        CompactionManifest::add_boundary_inputs(level_files, &mut self.input_files[0]);
        let mut compaction_level_key_range =
            FileMetadata::get_key_range_for_files(&self.input_files[0])?;

        self.input_files[1] = input_version.get_overlapping_compaction_inputs(
            self.level + 1,
            Some(&compaction_level_key_range.start)..Some(&compaction_level_key_range.end),
        );
        CompactionManifest::add_boundary_inputs(
            &input_version.files[self.level + 1],
            &mut self.input_files[1],
        );

        // Get the key range for all files involved in the compaction
        let mut maybe_all_files_range = FileMetadata::get_key_range_for_multiple_levels(&[
            &self.input_files[0],
            &self.input_files[1],
        ]);

        // See if we can grow the number of input files in the compaction level without adding
        // more files from the parent level
        if let (false, Some(all_files_range)) =
            (self.input_files[1].is_empty(), maybe_all_files_range.as_ref())
        {
            let mut expanded0_compaction_files = input_version.get_overlapping_compaction_inputs(
                self.level,
                Some(&all_files_range.start)..Some(&all_files_range.end),
            );
            CompactionManifest::add_boundary_inputs(
                level_files,
                &mut expanded0_compaction_files,
            );

            let inputs0_files_size = versioning::utils::sum_file_sizes(&self.input_files[0]);
            let inputs1_files_size = versioning::utils::sum_file_sizes(&self.input_files[1]);
            let expanded0_files_size =
                versioning::utils::sum_file_sizes(&expanded0_compaction_files);
            let has_expanded_files = expanded0_compaction_files.len() > self.input_files[0].len();
            let is_expanded_files_less_than_size_limit = (inputs1_files_size
                + expanded0_files_size)
                < self.expanded_compaction_byte_size_limit;

            if has_expanded_files && is_expanded_files_less_than_size_limit {
                if let Some(new_compaction_range) =
                    FileMetadata::get_key_range_for_files(&expanded0_compaction_files)
                {
                    let mut expanded1_files = input_version.get_overlapping_compaction_inputs(
                        self.level + 1,
                        Some(&new_compaction_range.start)..Some(&new_compaction_range.end),
                    );
                    CompactionManifest::add_boundary_inputs(
                        &input_version.files[self.level + 1],
                        &mut expanded1_files,
                    );

                    if expanded1_files.len() == self.input_files[1].len() {
                        log::info!(
                            "Expanding compaction inputs for compaction at level {level}. \
                            Compaction level and parent level have {compaction_level_files} + \
                            {parent_level_files} files at {compaction_level_bytes} + \
                            {parent_level_bytes} bytes. This is expanding to {expanded0_files} + \
                            {expanded1_files} files ({expanded0_bytes} + {expanded1_bytes} bytes).",
                            level = self.level,
                            compaction_level_files = self.input_files[0].len(),
                            parent_level_files = self.input_files[1].len(),
                            compaction_level_bytes = inputs0_files_size,
                            parent_level_bytes = inputs1_files_size,
                            expanded0_files = expanded0_compaction_files.len(),
                            expanded1_files = expanded1_files.len(),
                            expanded0_bytes = expanded0_files_size,
                            expanded1_bytes = inputs1_files_size
                        );

                        self.input_files[0] = expanded0_compaction_files;
                        self.input_files[1] = expanded1_files;
                        compaction_level_key_range = new_compaction_range;
                        maybe_all_files_range = FileMetadata::get_key_range_for_multiple_levels(&[
                            &self.input_files[0],
                            &self.input_files[1],
                        ]);
                    }
                }
            }
        }

        // Compute the set of grandparent files that overlap this compaction
        if let (true, Some(all_files_range)) = (
            self.level + 2 < MAX_NUM_LEVELS,
            maybe_all_files_range.as_ref(),
        ) {
            self.grandparent_files = input_version.get_overlapping_compaction_inputs(
                self.level + 2,
                Some(&all_files_range.start)..Some(&all_files_range.end),
            );
        }

        // Update the place where we will do the next compaction for this level. This is done
        // eagerly instead of waiting for the version change to be applied so that a failed
        // compaction is not retried on the same range forever.
        change_manifest
            .add_compaction_pointer(self.level, compaction_level_key_range.end.clone());

        Some(compaction_level_key_range.end)
    }

    /**
    Returns true if the compaction can be performed by moving the single input file to the parent
    level without merging or splitting it.

    Moving a file that overlaps a lot of grandparent data would make the next compaction of the
    parent level expensive, so such files are merged instead.
    */
    pub(crate) fn is_trivial_move(&self) -> bool {
        self.input_files[0].len() == 1
            && self.input_files[1].is_empty()
            && versioning::utils::sum_file_sizes(&self.grandparent_files)
                <= self.max_grandparent_overlap_bytes
    }

    /// Record the removal of every input file in the change manifest.
    pub(crate) fn add_input_deletions(&self, change_manifest: &mut VersionChangeManifest) {
        for (which, files) in self.input_files.iter().enumerate() {
            for file in files {
                change_manifest.remove_file(self.level + which, file.file_number());
            }
        }
    }

    /**
    Returns true if the information we have available guarantees that the compaction is producing
    data in the last level that may contain the user key i.e. no older level holds a record for
    the key.

    Keys must be checked in increasing order.
    */
    pub(crate) fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        for level in (self.level + 2)..MAX_NUM_LEVELS {
            let level_files = &self.input_version.files[level];
            while self.level_pointers[level] < level_files.len() {
                let file = &level_files[self.level_pointers[level]];
                if user_key <= file.largest_key().get_user_key() {
                    // We've advanced far enough
                    if user_key >= file.smallest_key().get_user_key() {
                        // Key falls in this file's range, so definitely not the base level
                        return false;
                    }

                    break;
                }

                self.level_pointers[level] += 1;
            }
        }

        true
    }

    /**
    Returns true if the output file being built should be finished before adding `key` because
    the file would overlap too much of the grandparent level.

    Keys must be checked in increasing order.
    */
    pub(crate) fn should_stop_before(&mut self, key: &InternalKey) -> bool {
        while self.grandparent_index < self.grandparent_files.len()
            && key > self.grandparent_files[self.grandparent_index].largest_key()
        {
            if self.seen_key {
                self.overlapped_bytes +=
                    self.grandparent_files[self.grandparent_index].get_file_size();
            }

            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes {
            // Too much overlap for the current output file so start a new output
            self.overlapped_bytes = 0;
            return true;
        }

        false
    }

    /**
    Create cursors over every input file of the compaction.

    Every level 0 input gets its own cursor because level 0 files can overlap.
    */
    pub(crate) fn make_input_iterators(
        &self,
        table_cache: &Arc<TableCache>,
    ) -> MistDBResult<Vec<BoxedInternalIterator>> {
        let mut iterators: Vec<BoxedInternalIterator> = vec![];
        for (which, files) in self.input_files.iter().enumerate() {
            if files.is_empty() {
                continue;
            }

            if self.level + which == 0 {
                for file in files {
                    let table = table_cache.find_table(file.file_number())?;
                    iterators.push(Box::new(table.iter()));
                }
            } else {
                iterators.push(Box::new(FilesEntryIterator::new(
                    files.clone(),
                    Arc::clone(table_cache),
                )));
            }
        }

        Ok(iterators)
    }
}

/// Private methods
impl CompactionManifest {
    /**
    Finds and adds files in the level that overlap user keys with the files chosen for compaction.

    The purpose of this function is to ensure that user key ranges are not split during compaction.
    A split in the user key range can cause an older record to be found in the younger level
    instead of the current record that was compacted.

    The file with the largest key **F1(l1, u1)** is picked out of the provided `compaction_files`
    where **l1** and **u1** define the key range of the file. A search is then performed for some
    file **F2(l2, u2)** in `level_files` where `user_key(u1) == user_key(l2)`. If such a file
    **F2** is found we call it a boundary file and add it to `compaction_files` and continue to
    search using this new upper bound.

    # Parameters

    - `level_files` - The files in the level that is being compacted
    - `compaction_files` - A subset of `level_files` that will actually be compacted
    */
    fn add_boundary_inputs(
        level_files: &[Arc<FileMetadata>],
        compaction_files: &mut Vec<Arc<FileMetadata>>,
    ) {
        let mut largest_key = match compaction_files.iter().map(|file| file.largest_key()).max() {
            Some(key) => key.clone(),
            None => return,
        };

        while let Some(boundary_file) =
            CompactionManifest::find_smallest_boundary_file(level_files, &largest_key)
        {
            largest_key = boundary_file.largest_key().clone();
            if !compaction_files
                .iter()
                .any(|file| file.file_number() == boundary_file.file_number())
            {
                compaction_files.push(boundary_file);
            }
        }
    }

    /**
    Find the file with the smallest key that is still greater than the `target_key` but
    contains the same user key.
    */
    fn find_smallest_boundary_file(
        level_files: &[Arc<FileMetadata>],
        target_key: &InternalKey,
    ) -> Option<Arc<FileMetadata>> {
        let mut smallest_boundary_file: Option<&Arc<FileMetadata>> = None;
        for file in level_files {
            let is_boundary_file = file.smallest_key() > target_key
                && file.smallest_key().get_user_key() == target_key.get_user_key();
            if !is_boundary_file {
                continue;
            }

            let is_smaller = smallest_boundary_file
                .map_or(true, |current| file.smallest_key() < current.smallest_key());
            if is_smaller {
                smallest_boundary_file = Some(file);
            }
        }

        smallest_boundary_file.cloned()
    }
}

impl fmt::Debug for CompactionManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file_numbers = |files: &[Arc<FileMetadata>]| -> Vec<u64> {
            files.iter().map(|file| file.file_number()).collect()
        };

        f.debug_struct("CompactionManifest")
            .field("level", &self.level)
            .field("compaction_level_files", &file_numbers(&self.input_files[0]))
            .field("parent_level_files", &file_numbers(&self.input_files[1]))
            .field("grandparent_files", &file_numbers(&self.grandparent_files))
            .finish()
    }
}
