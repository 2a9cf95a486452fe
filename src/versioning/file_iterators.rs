/*!
This modules contains iterators and utilities for creating iterators that work over a set of table
file metadata (i.e. [`FileMetadata`]) and over sets of other iterators.
*/

use std::fmt;
use std::sync::Arc;

use crate::errors::{MistDBError, MistDBResult};
use crate::iterator::{BoxedInternalIterator, MistDbIterator};
use crate::key::InternalKey;
use crate::table_cache::TableCache;
use crate::tables::TableIterator;

use super::file_metadata::FileMetadata;

/**
Iterates over the entries in an ordered list of files with disjoint key ranges.

Tables are only opened when the cursor reaches them.
*/
pub(crate) struct FilesEntryIterator {
    /// The ordered list of files to iterate.
    file_list: Vec<Arc<FileMetadata>>,

    /**
    The current index into the file list that the cursor is at.

    This value needs to stay in sync with the current table iterator. To ensure this, we only set
    this value in `FilesEntryIterator::set_table_iter`.
    */
    current_file_index: usize,

    /// The current table being iterated for entries.
    current_table_iter: Option<TableIterator>,

    /// The table cache to retrieve table files from.
    table_cache: Arc<TableCache>,

    /// The first error encountered while moving between files.
    maybe_error: Option<MistDBError>,
}

/// Crate-only methods
impl FilesEntryIterator {
    /// Create a new instance of [`FilesEntryIterator`].
    pub(crate) fn new(file_list: Vec<Arc<FileMetadata>>, table_cache: Arc<TableCache>) -> Self {
        Self {
            file_list,
            current_file_index: 0,
            current_table_iter: None,
            table_cache,
            maybe_error: None,
        }
    }
}

/// Private methods
impl FilesEntryIterator {
    /// Set the table iterator to be used for iteration.
    fn set_table_iter(&mut self, maybe_new_index: Option<usize>) -> MistDBResult<()> {
        let new_index = match maybe_new_index {
            Some(new_index) if new_index < self.file_list.len() => new_index,
            _ => {
                self.current_file_index = self.file_list.len();
                self.current_table_iter = None;
                return Ok(());
            }
        };

        if new_index == self.current_file_index && self.current_table_iter.is_some() {
            // The file we need to iterate is the same as the current one
            return Ok(());
        }

        self.current_file_index = new_index;
        self.current_table_iter = None;
        let table = self
            .table_cache
            .find_table(self.file_list[new_index].file_number())?;
        self.current_table_iter = Some(table.iter());

        Ok(())
    }

    fn table_iter_is_valid(&self) -> bool {
        self.current_table_iter
            .as_ref()
            .map_or(false, |iter| iter.is_valid())
    }

    /// Surface an error hit by the current table iterator while it was moving.
    fn check_table_iter_error(&mut self) -> MistDBResult<()> {
        match self
            .current_table_iter
            .as_mut()
            .and_then(|iter| iter.take_error())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Move forward through any empty files.
    fn skip_empty_table_files_forward(&mut self) -> MistDBResult<()> {
        self.check_table_iter_error()?;
        while !self.table_iter_is_valid() {
            if self.current_file_index + 1 >= self.file_list.len() {
                // We've reached the end of the file list so there are no more tables to iterate
                self.current_file_index = self.file_list.len();
                self.current_table_iter = None;
                return Ok(());
            }

            self.set_table_iter(Some(self.current_file_index + 1))?;
            if let Some(table_iter) = self.current_table_iter.as_mut() {
                table_iter.seek_to_first()?;
            }
        }

        Ok(())
    }

    /// Move the file index and table iterator backward until we find a non-empty file.
    fn skip_empty_table_files_backward(&mut self) -> MistDBResult<()> {
        self.check_table_iter_error()?;
        while !self.table_iter_is_valid() {
            if self.current_file_index == 0 || self.file_list.is_empty() {
                // We've reached the start of the file list so there are no more tables to iterate
                self.current_table_iter = None;
                return Ok(());
            }

            self.set_table_iter(Some(self.current_file_index - 1))?;
            if let Some(table_iter) = self.current_table_iter.as_mut() {
                table_iter.seek_to_last()?;
            }
        }

        Ok(())
    }

    /// Invalidate the iterator and hold on to the error for [`MistDbIterator::take_error`].
    fn record_error(&mut self, error: MistDBError) {
        log::error!(
            "There was an error moving between table files. Error: {}",
            error
        );
        self.current_table_iter = None;
        if self.maybe_error.is_none() {
            self.maybe_error = Some(error);
        }
    }
}

impl MistDbIterator for FilesEntryIterator {
    type Key = InternalKey;
    type Error = MistDBError;

    fn is_valid(&self) -> bool {
        self.table_iter_is_valid()
    }

    fn seek(&mut self, target: &InternalKey) -> MistDBResult<()> {
        let maybe_new_index =
            super::utils::find_file_with_upper_bound_range(&self.file_list, target);
        self.set_table_iter(maybe_new_index)?;
        if let Some(table_iter) = self.current_table_iter.as_mut() {
            table_iter.seek(target)?;
        }

        self.skip_empty_table_files_forward()
    }

    fn seek_to_first(&mut self) -> MistDBResult<()> {
        self.set_table_iter(Some(0))?;
        if let Some(table_iter) = self.current_table_iter.as_mut() {
            table_iter.seek_to_first()?;
        }

        self.skip_empty_table_files_forward()
    }

    fn seek_to_last(&mut self) -> MistDBResult<()> {
        self.set_table_iter(self.file_list.len().checked_sub(1))?;
        if let Some(table_iter) = self.current_table_iter.as_mut() {
            table_iter.seek_to_last()?;
        }

        self.skip_empty_table_files_backward()
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        if !self.is_valid() {
            return None;
        }

        let moved = self
            .current_table_iter
            .as_mut()
            .and_then(|iter| iter.next())
            .is_some();
        if !moved {
            if let Err(error) = self.skip_empty_table_files_forward() {
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
            .current_table_iter
            .as_mut()
            .and_then(|iter| iter.prev())
            .is_some();
        if !moved {
            if let Err(error) = self.skip_empty_table_files_backward() {
                self.record_error(error);
                return None;
            }
        }

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current_table_iter.as_ref()?.current()
    }

    fn take_error(&mut self) -> Option<MistDBError> {
        self.maybe_error.take()
    }
}

impl fmt::Debug for FilesEntryIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesEntryIterator")
            .field("num_files", &self.file_list.len())
            .field("current_file_index", &self.current_file_index)
            .finish()
    }
}

/// Enum for indicating the direction of iteration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum IterationDirection {
    Forward,
    Backward,
}

/**
An iterator that merges the output of a list of iterators in sorted order.

This iterator does not do any sort of de-duplication. Records with the same user key come out
newest first because of the ordering of internal keys.
*/
pub(crate) struct MergingIterator {
    /// The underlying iterators.
    iterators: Vec<BoxedInternalIterator>,

    /// The current direction of iteration.
    direction: IterationDirection,

    /// The index of the iterator we are currently reading.
    current_iterator_index: Option<usize>,

    /**
    Store errors encountered during iteration. The index of the error maps to the index of the
    iterator that encountered the error. Only one error is stored per iterator.
    */
    errors: Vec<Option<MistDBError>>,
}

/// Crate-only methods
impl MergingIterator {
    /// Create a new instance of [`MergingIterator`].
    pub(crate) fn new(iterators: Vec<BoxedInternalIterator>) -> Self {
        let errors = vec![None; iterators.len()];

        Self {
            iterators,
            direction: IterationDirection::Forward,
            current_iterator_index: None,
            errors,
        }
    }
}

/// Private methods
impl MergingIterator {
    /// Find the iterator with the currently smallest key and update the merging iterator state.
    fn find_smallest(&mut self) {
        let mut maybe_smallest: Option<(usize, &InternalKey)> = None;
        for (index, iter) in self.iterators.iter().enumerate() {
            if let Some((key, _)) = iter.current() {
                match maybe_smallest {
                    Some((_, smallest_key)) if smallest_key <= key => {}
                    _ => maybe_smallest = Some((index, key)),
                }
            }
        }

        self.current_iterator_index = maybe_smallest.map(|(index, _)| index);
    }

    /**
    Find the iterator with the currently largest key and update the merging iterator state.

    Iterators are checked from last to first so that ties resolve to the last iterator.
    */
    fn find_largest(&mut self) {
        let mut maybe_largest: Option<(usize, &InternalKey)> = None;
        for (index, iter) in self.iterators.iter().enumerate().rev() {
            if let Some((key, _)) = iter.current() {
                match maybe_largest {
                    Some((_, largest_key)) if largest_key >= key => {}
                    _ => maybe_largest = Some((index, key)),
                }
            }
        }

        self.current_iterator_index = maybe_largest.map(|(index, _)| index);
    }

    /// Store the error at the specified index.
    fn save_error(&mut self, iterator_index: usize, error: MistDBError) {
        log::error!(
            "An error occurred during a merge iteration. Error: {}",
            &error
        );
        if self.errors[iterator_index].is_none() {
            self.errors[iterator_index] = Some(error);
        }
    }

    /// Run a positioning operation on every child iterator, saving any errors.
    fn position_all<F>(&mut self, mut position: F)
    where
        F: FnMut(&mut BoxedInternalIterator) -> MistDBResult<()>,
    {
        for index in 0..self.iterators.len() {
            if let Err(error) = position(&mut self.iterators[index]) {
                self.save_error(index, error);
            }
        }
    }
}

impl MistDbIterator for MergingIterator {
    type Key = InternalKey;
    type Error = MistDBError;

    fn is_valid(&self) -> bool {
        self.current_iterator_index.is_some()
    }

    fn seek(&mut self, target: &InternalKey) -> MistDBResult<()> {
        self.position_all(|iter| iter.seek(target));
        self.find_smallest();
        self.direction = IterationDirection::Forward;

        Ok(())
    }

    fn seek_to_first(&mut self) -> MistDBResult<()> {
        self.position_all(|iter| iter.seek_to_first());
        self.find_smallest();
        self.direction = IterationDirection::Forward;

        Ok(())
    }

    fn seek_to_last(&mut self) -> MistDBResult<()> {
        self.position_all(|iter| iter.seek_to_last());
        self.find_largest();
        self.direction = IterationDirection::Backward;

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let current_index = self.current_iterator_index?;

        /*
        Ensure that all child iterators are positioned after the current key.
        If we are already moving in the forward direction, this is implicitly true for all
        non-current iterators since the current iterator is the smallest iterator. Otherwise, we
        explicitly position the non-current iterators.
        */
        if self.direction == IterationDirection::Backward {
            let current_key = self.iterators[current_index].current()?.0.clone();
            for index in 0..self.iterators.len() {
                if index == current_index {
                    continue;
                }

                let iter = &mut self.iterators[index];
                let seek_result = iter.seek(&current_key);
                if iter.current().map_or(false, |(key, _)| *key == current_key) {
                    iter.next();
                }

                if let Err(error) = seek_result {
                    self.save_error(index, error);
                }
            }

            self.direction = IterationDirection::Forward;
        }

        self.iterators[current_index].next();
        self.find_smallest();

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let current_index = self.current_iterator_index?;

        /*
        Ensure that all child iterators are positioned before the current key.
        If we are already moving in the backward direction, this is implicitly true for all
        non-current iterators since the current iterator is the largest iterator. Otherwise, we
        explicitly position the non-current iterators.
        */
        if self.direction == IterationDirection::Forward {
            let current_key = self.iterators[current_index].current()?.0.clone();
            for index in 0..self.iterators.len() {
                if index == current_index {
                    continue;
                }

                let iter = &mut self.iterators[index];
                let mut seek_result = iter.seek(&current_key);
                if iter.is_valid() {
                    // The child iterator's first entry is >= the current key. Step back one to be
                    // less than the current key.
                    iter.prev();
                } else if seek_result.is_ok() {
                    // The child iterator has no entries with keys >= the current key. Position at
                    // the last entry.
                    seek_result = iter.seek_to_last();
                }

                if let Err(error) = seek_result {
                    self.save_error(index, error);
                }
            }

            self.direction = IterationDirection::Backward;
        }

        self.iterators[current_index].prev();
        self.find_largest();

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.iterators[self.current_iterator_index?].current()
    }

    fn take_error(&mut self) -> Option<MistDBError> {
        if let Some(error) = self.errors.iter_mut().find_map(|maybe_error| maybe_error.take()) {
            return Some(error);
        }

        self.iterators.iter_mut().find_map(|iter| iter.take_error())
    }
}

impl fmt::Debug for MergingIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergingIterator")
            .field("num_iterators", &self.iterators.len())
            .field("direction", &self.direction)
            .field("current_iterator_index", &self.current_iterator_index)
            .finish()
    }
}

#[cfg(test)]
mod files_entry_iterator_tests {
    use pretty_assertions::assert_eq;

    use crate::file_names::FileNameHandler;
    use crate::fs::OsFileSystem;
    use crate::key::Operation;
    use crate::tables::TableBuilder;
    use crate::DbOptions;

    use super::*;

    fn setup() -> (tempfile::TempDir, DbOptions) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();

        let temp_dir = tempfile::tempdir().unwrap();
        let options = DbOptions {
            db_path: temp_dir.path().to_str().unwrap().to_string(),
            max_block_size: 256,
            filesystem_provider: Arc::new(OsFileSystem::new()),
            ..DbOptions::default()
        };
        options
            .filesystem_provider()
            .create_dir_all(&FileNameHandler::new(options.db_path()).get_data_dir())
            .unwrap();

        (temp_dir, options)
    }

    /// Create tables holding the keys `start..end` (zero padded) with 100 keys per file.
    fn create_files(options: &DbOptions, start: u64, end: u64) -> Vec<Arc<FileMetadata>> {
        let mut files = vec![];
        let mut file_start = start;
        while file_start < end {
            let file_end = (file_start + 100).min(end);
            let file_number = file_start + 1;
            let path = FileNameHandler::new(options.db_path()).get_table_file_path(file_number);
            let mut builder =
                TableBuilder::new(options, options.filesystem_provider(), path, file_number)
                    .unwrap();
            let keys: Vec<InternalKey> = (file_start..file_end)
                .map(|idx| InternalKey::new(format!("{:05}", idx).into_bytes(), idx, Operation::Put))
                .collect();
            for key in keys.iter() {
                builder.add_entry(key, key.get_user_key()).unwrap();
            }
            builder.finalize().unwrap();

            files.push(Arc::new(FileMetadata::new(
                file_number,
                builder.file_size(),
                keys.first().unwrap().clone(),
                keys.last().unwrap().clone(),
            )));
            file_start = file_end;
        }

        files
    }

    #[test]
    fn files_entry_iterator_with_an_empty_file_list_does_not_become_valid() {
        let (_temp_dir, options) = setup();
        let table_cache = Arc::new(TableCache::new(&options));
        let mut iter = FilesEntryIterator::new(vec![], table_cache);

        assert!(!iter.is_valid());
        iter.seek_to_first().unwrap();
        assert!(!iter.is_valid());
        iter.seek_to_last().unwrap();
        assert!(!iter.is_valid());
        iter.seek(&InternalKey::new_for_seeking(b"00010".to_vec(), 10))
            .unwrap();
        assert!(!iter.is_valid());
        assert!(iter.next().is_none());
        assert!(iter.prev().is_none());
    }

    #[test]
    fn files_entry_iterator_can_seek_to_specific_targets() {
        let (_temp_dir, options) = setup();
        let table_cache = Arc::new(TableCache::new(&options));
        let files = create_files(&options, 0, 350);
        let mut iter = FilesEntryIterator::new(files, table_cache);

        iter.seek(&InternalKey::new_for_seeking(b"00150".to_vec(), 500))
            .unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00150");

        // Seeking past the end of a file moves to the next file
        iter.seek(&InternalKey::new_for_seeking(b"00099".to_vec(), 0))
            .unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00100");

        iter.seek(&InternalKey::new_for_seeking(b"00349".to_vec(), 500))
            .unwrap();
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00349");
        assert!(iter.next().is_none());

        iter.seek(&InternalKey::new_for_seeking(b"1".to_vec(), 500))
            .unwrap();
        assert!(!iter.is_valid());
    }

    #[test]
    fn files_entry_iterator_can_be_iterated_in_both_directions_completely() {
        let (_temp_dir, options) = setup();
        let table_cache = Arc::new(TableCache::new(&options));
        let files = create_files(&options, 0, 250);
        let mut iter = FilesEntryIterator::new(files, table_cache);

        iter.seek_to_first().unwrap();
        let mut forward_count = 1;
        let mut previous_key = iter.current().unwrap().0.clone();
        while let Some((key, value)) = iter.next() {
            assert!(previous_key < *key);
            assert_eq!(key.get_user_key(), value.as_slice());
            previous_key = key.clone();
            forward_count += 1;
        }
        assert_eq!(forward_count, 250);
        assert!(iter.take_error().is_none());

        iter.seek_to_last().unwrap();
        let mut backward_count = 1;
        assert_eq!(iter.current().unwrap().0.get_user_key(), b"00249");
        while iter.prev().is_some() {
            backward_count += 1;
        }
        assert_eq!(backward_count, 250);
    }
}
