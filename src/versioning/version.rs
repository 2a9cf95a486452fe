use std::cmp::Reverse;
use std::ops::Range;
use std::sync::Arc;

use crate::config::{
    L0_COMPACTION_TRIGGER, LEVEL_ONE_MAX_BYTES, MAX_MEM_COMPACT_LEVEL, MAX_NUM_LEVELS,
};
use crate::entry::Entry;
use crate::errors::MistDBResult;
use crate::iterator::BoxedInternalIterator;
use crate::key::{InternalKey, Operation, MAX_SEQUENCE_NUMBER};
use crate::table_cache::TableCache;
use crate::{compaction, DbOptions};

use super::file_iterators::FilesEntryIterator;
use super::file_metadata::FileMetadata;

/**
Metadata used for scoring the necessity of compacting a version based on the size of files within
the version.
*/
#[derive(Clone, Debug)]
pub(crate) struct SizeCompactionMetadata {
    /// The level that should be compacted next.
    pub(crate) compaction_level: usize,

    /**
    A score for determining the necessity of compaction for the level that will be compacted next.

    A score < 1 means that compaction is not strictly necessary.
    */
    pub(crate) compaction_score: f64,
}

/// Version contains information that represents a point in time state of the database.
#[derive(Clone, Debug)]
pub(crate) struct Version {
    /// Options configuring database behavior.
    db_options: DbOptions,

    /**
    List of files per level.

    Files at level 0 are kept in the order they were added and may overlap. Files at every other
    level are sorted by their smallest key and have disjoint key ranges.
    */
    pub(crate) files: [Vec<Arc<FileMetadata>>; MAX_NUM_LEVELS],

    /**
    Metadata used for scoring the necessity of compacting a version based on the size of files
    within the version.

    These fields are populated when the version is finalized (e.g. via [`Version::finalize`]).
    */
    size_compaction_metadata: Option<SizeCompactionMetadata>,

    /**
    The sequence number that this version was created at.

    This information is used primarily for debugging purposes.
    */
    last_sequence_number: u64,

    /**
    The file number of the write-ahead log in use at the time that this version was created.

    This information is used primarily for debugging purposes.
    */
    wal_file_number: u64,
}

/// Crate-only methods
impl Version {
    /// Create a new, empty [`Version`].
    pub(crate) fn new(db_options: DbOptions, last_sequence_number: u64, wal_file_number: u64) -> Self {
        Self {
            db_options,
            files: Default::default(),
            size_compaction_metadata: None,
            last_sequence_number,
            wal_file_number,
        }
    }

    /**
    Look up the newest record for the user key of `key` that is visible at the sequence number of
    `key`.

    Level 0 files are checked from newest to oldest. Every other level holds at most one candidate
    file for a key. A tombstone is returned as an [`Entry`] without a value so that the caller
    does not look any further.

    # Concurrency

    Does not require a lock to be held.
    */
    pub(crate) fn get(
        &self,
        table_cache: &TableCache,
        key: &InternalKey,
    ) -> MistDBResult<Option<Entry>> {
        let user_key = key.get_user_key();

        let mut level_zero_candidates: Vec<&Arc<FileMetadata>> = self.files[0]
            .iter()
            .filter(|file| {
                file.smallest_key().get_user_key() <= user_key
                    && file.largest_key().get_user_key() >= user_key
            })
            .collect();
        level_zero_candidates.sort_by_key(|file| Reverse(file.file_number()));
        for file in level_zero_candidates {
            if let Some(entry) = table_cache.get(file.file_number(), key)? {
                return Ok(Some(entry));
            }
        }

        for level in 1..MAX_NUM_LEVELS {
            let level_files = &self.files[level];
            let maybe_file_index = super::utils::find_file_with_upper_bound_range(level_files, key);
            let file = match maybe_file_index {
                Some(file_index) => &level_files[file_index],
                None => continue,
            };

            if file.smallest_key().get_user_key() > user_key {
                continue;
            }

            if let Some(entry) = table_cache.get(file.file_number(), key)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Return the number of table files at the specified level.
    pub(crate) fn num_files_at_level(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Get a reference to the version's size compaction metadata.
    pub(crate) fn get_size_compaction_metadata(&self) -> Option<&SizeCompactionMetadata> {
        self.size_compaction_metadata.as_ref()
    }

    /// Get the last sequence number recorded when the version was created.
    pub(crate) fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// Get the WAL file number that the version was created at.
    pub(crate) fn wal_file_number(&self) -> u64 {
        self.wal_file_number
    }

    /// Clones the current version while resetting compaction metadata.
    pub(crate) fn new_from_current(
        &self,
        last_sequence_number: u64,
        wal_file_number: u64,
    ) -> Version {
        let mut new_version = self.clone();
        new_version.size_compaction_metadata = None;
        new_version.last_sequence_number = last_sequence_number;
        new_version.wal_file_number = wal_file_number;

        new_version
    }

    /// Iterate the numbers of every table file referenced by the version.
    pub(crate) fn file_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.files
            .iter()
            .flat_map(|level_files| level_files.iter().map(|file| file.file_number()))
    }

    /// Return the level of the file with the given number if the version references it.
    pub(crate) fn find_file_level(&self, file_number: u64) -> Option<usize> {
        self.files.iter().position(|level_files| {
            level_files
                .iter()
                .any(|file| file.file_number() == file_number)
        })
    }

    /**
    Return the level at which we should place a new memtable compaction result that covers the
    range from `smallest_user_key` to `largest_user_key`.
    */
    pub(crate) fn pick_level_for_memtable_output(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> usize {
        let mut level: usize = 0;
        if self.has_overlap_in_level(0, smallest_user_key, largest_user_key) {
            // Level 0 is the only level that allows overlaps so the new table must go here
            return level;
        }

        /*
        Try to add the new table file as deeply as possible up to `MAX_MEM_COMPACT_LEVEL` as long
        as:

        1. There is no overlap in the next level (l + 1)
        2. The number of overlapping bytes in the level after the next (l + 2) do not breach a set
           threshold
        */
        let start_key =
            InternalKey::new_for_seeking(smallest_user_key.to_vec(), MAX_SEQUENCE_NUMBER);
        let end_key = InternalKey::new(largest_user_key.to_vec(), 0, Operation::Delete);
        let max_grandparent_overlap =
            compaction::utils::max_grandparent_overlap_bytes_from_options(&self.db_options);
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.has_overlap_in_level(level + 1, smallest_user_key, largest_user_key) {
                break;
            }

            if level + 2 < MAX_NUM_LEVELS {
                let files_overlapping_range = self
                    .get_overlapping_compaction_inputs(level + 2, Some(&start_key)..Some(&end_key));
                let total_overlapping_file_size =
                    super::utils::sum_file_sizes(&files_overlapping_range);
                if total_overlapping_file_size > max_grandparent_overlap {
                    break;
                }
            }

            level += 1;
        }

        level
    }

    /**
    Get table files at the specified level that overlap the specified user key range.

    An unbounded end of the range is represented by `None`. At level 0, the key range is expanded
    whenever an overlapping file extends past it and the search restarts so that every level 0 file
    transitively overlapping the range is included.
    */
    pub(crate) fn get_overlapping_compaction_inputs(
        &self,
        level: usize,
        key_range: Range<Option<&InternalKey>>,
    ) -> Vec<Arc<FileMetadata>> {
        let mut overlapping_files: Vec<Arc<FileMetadata>> = vec![];
        let mut maybe_start_user_key: Option<&[u8]> =
            key_range.start.map(|internal_key| internal_key.get_user_key());
        let mut maybe_end_user_key: Option<&[u8]> =
            key_range.end.map(|internal_key| internal_key.get_user_key());

        let level_files = &self.files[level];
        let mut index: usize = 0;
        while index < level_files.len() {
            let current_file = &level_files[index];
            index += 1;

            let file_range_start = current_file.smallest_key().get_user_key();
            let file_range_end = current_file.largest_key().get_user_key();
            let is_file_range_before_target =
                maybe_start_user_key.map_or(false, |start| file_range_end < start);
            let is_file_range_after_target =
                maybe_end_user_key.map_or(false, |end| end < file_range_start);
            if is_file_range_before_target || is_file_range_after_target {
                continue;
            }

            overlapping_files.push(Arc::clone(current_file));
            if level != 0 {
                continue;
            }

            // Level-0 files may have overlapping key ranges. Check if the newly added file
            // expands our target range. If so, update the search range and restart the search.
            if maybe_start_user_key.map_or(false, |start| file_range_start < start) {
                maybe_start_user_key = Some(file_range_start);
                overlapping_files.clear();
                index = 0;
            } else if maybe_end_user_key.map_or(false, |end| file_range_end > end) {
                maybe_end_user_key = Some(file_range_end);
                overlapping_files.clear();
                index = 0;
            }
        }

        overlapping_files
    }

    /**
    Returns true if and only if some file in the specified level overlaps some part of the
    range covered by the provided user keys.
    */
    pub(crate) fn has_overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> bool {
        Version::some_file_overlaps_range(
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /**
    Finalize a version by calculating compaction scores.

    Level 0 is treated differently than other levels where it is bounded by number of files rather
    than the total bytes in the level for two reasons:

    1. With larger memtables, level 0 compactions can be read intensive

    1. The files in level 0 are merged on every read, so we want to minimize the number of
       individual files when the file size is small. File sizes can be small if the memtable maximum
       size setting is low, if the compression ratios are high, or if there are lots of writes or
       individual deletions.

    The last level is never scored because there is no level to compact it into.
    */
    pub(crate) fn finalize(&mut self) {
        let mut best_level: usize = 0;
        let mut best_score: f64 = -1.;

        for level in 0..(MAX_NUM_LEVELS - 1) {
            let new_score = if level == 0 {
                self.files[level].len() as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                let level_file_size = super::utils::sum_file_sizes(&self.files[level]) as f64;
                level_file_size / Version::max_bytes_for_level(level)
            };

            if new_score > best_score {
                best_score = new_score;
                best_level = level;
            }
        }

        self.size_compaction_metadata = Some(SizeCompactionMetadata {
            compaction_level: best_level,
            compaction_score: best_score,
        });
    }

    /// Returns true if the version requires a size triggered compaction.
    pub(crate) fn requires_size_compaction(&self) -> bool {
        self.size_compaction_metadata
            .as_ref()
            .map_or(false, |metadata| metadata.compaction_score >= 1.)
    }

    /**
    Create cursors over every table file in the version.

    Every level 0 file gets its own cursor because level 0 files can overlap. Each deeper level is
    covered by a single cursor that opens its files lazily.
    */
    pub(crate) fn new_iterators(
        &self,
        table_cache: &Arc<TableCache>,
    ) -> MistDBResult<Vec<BoxedInternalIterator>> {
        let mut iterators: Vec<BoxedInternalIterator> = vec![];
        for file in self.files[0].iter() {
            let table = table_cache.find_table(file.file_number())?;
            iterators.push(Box::new(table.iter()));
        }

        for level in 1..MAX_NUM_LEVELS {
            if self.files[level].is_empty() {
                continue;
            }

            iterators.push(Box::new(FilesEntryIterator::new(
                self.files[level].clone(),
                Arc::clone(table_cache),
            )));
        }

        Ok(iterators)
    }

    /**
    Calculate the maximum number of bytes allowed for a level.

    Note that the level 0 result is not really used because the level 0 compaction threshold is
    based on the number of files in the level.
    */
    pub(crate) fn max_bytes_for_level(level: usize) -> f64 {
        let mut level = level;
        let mut result: f64 = LEVEL_ONE_MAX_BYTES;
        while level > 1 {
            result *= 10.;
            level -= 1;
        }

        result
    }
}

/// Private methods
impl Version {
    /**
    Returns true if and only if some file in the provided `files` overlaps the key range formed by
    the provided user keys.

    If `disjoint_sorted_files` is set to true, `files` must contain files with disjoint
    (i.e. non-overlapping) key ranges in sorted order. For example, the files in any one level,
    where the level is > 0, have non-overlapping key ranges.
    */
    fn some_file_overlaps_range(
        disjoint_sorted_files: bool,
        files: &[Arc<FileMetadata>],
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> bool {
        if !disjoint_sorted_files {
            // Need to check all files if there are overlapping key ranges
            return files.iter().any(|file| {
                let is_key_after_file = smallest_user_key > file.largest_key().get_user_key();
                let is_key_before_file = largest_user_key < file.smallest_key().get_user_key();

                !(is_key_after_file || is_key_before_file)
            });
        }

        // Create the earliest full key from the specified user key, recalling that sequence
        // numbers are sorted in decreasing order.
        let smallest_full_key =
            InternalKey::new_for_seeking(smallest_user_key.to_vec(), MAX_SEQUENCE_NUMBER);
        match super::utils::find_file_with_upper_bound_range(files, &smallest_full_key) {
            // The beginning of the range is after all of the files, so there is no overlap
            None => false,
            // The file ends after `smallest_user_key` so it overlaps unless it starts after
            // `largest_user_key`
            Some(file_index) => largest_user_key >= files[file_index].smallest_key().get_user_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::file_names::FileNameHandler;
    use crate::fs::OsFileSystem;
    use crate::tables::TableBuilder;

    use super::*;

    fn setup() -> (tempfile::TempDir, DbOptions) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();

        let temp_dir = tempfile::tempdir().unwrap();
        let options = DbOptions {
            db_path: temp_dir.path().to_str().unwrap().to_string(),
            filesystem_provider: Arc::new(OsFileSystem::new()),
            ..DbOptions::default()
        };
        options
            .filesystem_provider()
            .create_dir_all(&FileNameHandler::new(options.db_path()).get_data_dir())
            .unwrap();

        (temp_dir, options)
    }

    fn file(file_number: u64, file_size: u64, smallest: &str, largest: &str) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            file_number,
            file_size,
            InternalKey::new(smallest.as_bytes().to_vec(), 100, Operation::Put),
            InternalKey::new(largest.as_bytes().to_vec(), 1, Operation::Put),
        ))
    }

    /// Write a table holding `(user key, sequence number, value)` records and describe it.
    fn write_table(
        options: &DbOptions,
        file_number: u64,
        records: &[(&str, u64, Option<&str>)],
    ) -> Arc<FileMetadata> {
        let path = FileNameHandler::new(options.db_path()).get_table_file_path(file_number);
        let mut builder =
            TableBuilder::new(options, options.filesystem_provider(), path, file_number).unwrap();
        let mut keys = vec![];
        for (user_key, sequence_number, maybe_value) in records {
            let operation = if maybe_value.is_some() {
                Operation::Put
            } else {
                Operation::Delete
            };
            let key = InternalKey::new(user_key.as_bytes().to_vec(), *sequence_number, operation);
            builder
                .add_entry(&key, maybe_value.unwrap_or("").as_bytes())
                .unwrap();
            keys.push(key);
        }
        builder.finalize().unwrap();

        Arc::new(FileMetadata::new(
            file_number,
            builder.file_size(),
            keys.first().unwrap().clone(),
            keys.last().unwrap().clone(),
        ))
    }

    #[test]
    fn get_prefers_newer_level_zero_files_and_then_deeper_levels() {
        let (_temp_dir, options) = setup();
        let table_cache = TableCache::new(&options);
        let mut version = Version::new(options.clone(), 0, 0);
        version.files[0] = vec![
            write_table(&options, 1, &[("a", 1, Some("old")), ("c", 2, Some("c-old"))]),
            write_table(&options, 2, &[("a", 5, Some("new")), ("b", 6, None)]),
        ];
        version.files[1] = vec![
            write_table(&options, 3, &[("b", 0, Some("b-deep")), ("d", 0, Some("d"))]),
            write_table(&options, 4, &[("m", 0, Some("m")), ("p", 0, Some("p"))]),
        ];

        let get = |user_key: &str, sequence_number: u64| {
            version
                .get(
                    &table_cache,
                    &InternalKey::new_for_seeking(user_key.as_bytes().to_vec(), sequence_number),
                )
                .unwrap()
        };

        assert_eq!(get("a", 10).unwrap().value(), Some(&b"new"[..]));
        assert_eq!(get("a", 4).unwrap().value(), Some(&b"old"[..]));
        assert!(get("b", 10).unwrap().is_tombstone());
        assert_eq!(get("b", 5).unwrap().value(), Some(&b"b-deep"[..]));
        assert_eq!(get("c", 10).unwrap().value(), Some(&b"c-old"[..]));
        assert_eq!(get("p", 10).unwrap().value(), Some(&b"p"[..]));
        assert!(get("n", 10).is_none());
        assert!(get("z", 10).is_none());
    }

    #[test]
    fn overlapping_inputs_at_level_zero_expand_the_key_range() {
        let (_temp_dir, options) = setup();
        let mut version = Version::new(options, 0, 0);
        version.files[0] = vec![
            file(1, 10, "f", "k"),
            file(2, 10, "a", "c"),
            file(3, 10, "j", "p"),
            file(4, 10, "x", "z"),
        ];
        version.files[1] = vec![file(5, 10, "a", "d"), file(6, 10, "e", "g"), file(7, 10, "h", "z")];

        let start = InternalKey::new_for_seeking(b"g".to_vec(), MAX_SEQUENCE_NUMBER);
        let end = InternalKey::new(b"h".to_vec(), 0, Operation::Delete);

        let level_zero_inputs: Vec<u64> = version
            .get_overlapping_compaction_inputs(0, Some(&start)..Some(&end))
            .iter()
            .map(|file| file.file_number())
            .collect();
        assert_eq!(level_zero_inputs, vec![1, 3]);

        let level_one_inputs: Vec<u64> = version
            .get_overlapping_compaction_inputs(1, Some(&start)..Some(&end))
            .iter()
            .map(|file| file.file_number())
            .collect();
        assert_eq!(level_one_inputs, vec![6, 7]);

        let everything = version.get_overlapping_compaction_inputs(1, None..None);
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn overlap_checks_handle_sorted_and_unsorted_levels() {
        let (_temp_dir, options) = setup();
        let mut version = Version::new(options, 0, 0);
        version.files[0] = vec![file(1, 10, "m", "p"), file(2, 10, "a", "c")];
        version.files[2] = vec![file(3, 10, "c", "e"), file(4, 10, "k", "n")];

        assert!(version.has_overlap_in_level(0, b"b", b"b"));
        assert!(!version.has_overlap_in_level(0, b"d", b"l"));
        assert!(version.has_overlap_in_level(2, b"f", b"k"));
        assert!(!version.has_overlap_in_level(2, b"f", b"j"));
        assert!(!version.has_overlap_in_level(2, b"o", b"z"));
        assert!(!version.has_overlap_in_level(1, b"a", b"z"));
    }

    #[test]
    fn memtable_output_is_pushed_down_when_nothing_overlaps() {
        let (_temp_dir, options) = setup();
        let mut version = Version::new(options, 0, 0);
        assert_eq!(version.pick_level_for_memtable_output(b"a", b"c"), MAX_MEM_COMPACT_LEVEL);

        version.files[0] = vec![file(1, 10, "a", "b")];
        assert_eq!(version.pick_level_for_memtable_output(b"b", b"c"), 0);

        version.files[0].clear();
        version.files[2] = vec![file(2, 10, "c", "d")];
        assert_eq!(version.pick_level_for_memtable_output(b"a", b"c"), 1);
    }

    #[test]
    fn finalize_scores_level_zero_by_file_count_and_other_levels_by_size() {
        let (_temp_dir, options) = setup();
        let mut version = Version::new(options, 0, 0);
        version.finalize();
        assert!(!version.requires_size_compaction());

        version.files[0] = (1..=3).map(|n| file(n, 10, "a", "b")).collect();
        version.finalize();
        let metadata = version.get_size_compaction_metadata().unwrap();
        assert_eq!(metadata.compaction_level, 0);
        assert_eq!(metadata.compaction_score, 0.75);
        assert!(!version.requires_size_compaction());

        version.files[2] = vec![file(9, 2 * 100 * 1024 * 1024, "a", "z")];
        version.finalize();
        let metadata = version.get_size_compaction_metadata().unwrap();
        assert_eq!(metadata.compaction_level, 2);
        assert!(version.requires_size_compaction());
    }
}
