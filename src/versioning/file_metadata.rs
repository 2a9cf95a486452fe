use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use crate::key::InternalKey;
use crate::utils::comparator::Comparator;

/// Metadata about a table file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FileMetadata {
    /// The globally increasing, sequential number for on-disk data files.
    file_number: u64,

    /// The size of the table file in bytes.
    file_size: u64,

    /// The smallest internal key served by the table.
    smallest_key: InternalKey,

    /// The largest internal key served by the table.
    largest_key: InternalKey,
}

/// Crate-only methods
impl FileMetadata {
    /// Create a new instance of [`FileMetadata`].
    pub(crate) fn new(
        file_number: u64,
        file_size: u64,
        smallest_key: InternalKey,
        largest_key: InternalKey,
    ) -> Self {
        Self {
            file_number,
            file_size,
            smallest_key,
            largest_key,
        }
    }

    /// Get the file number of the table file.
    pub(crate) fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the size of the table file in bytes.
    pub(crate) fn get_file_size(&self) -> u64 {
        self.file_size
    }

    /// Get a reference to the smallest key served by the table.
    pub(crate) fn smallest_key(&self) -> &InternalKey {
        &self.smallest_key
    }

    /// Get a reference to the largest key served by the table.
    pub(crate) fn largest_key(&self) -> &InternalKey {
        &self.largest_key
    }

    /// Get the smallest and largest keys over all of the provided files.
    pub(crate) fn get_key_range_for_files(
        files: &[Arc<FileMetadata>],
    ) -> Option<Range<InternalKey>> {
        let mut files_iter = files.iter();
        let first_file = files_iter.next()?;
        let mut smallest_key = first_file.smallest_key();
        let mut largest_key = first_file.largest_key();
        for file in files_iter {
            if file.smallest_key() < smallest_key {
                smallest_key = file.smallest_key();
            }

            if file.largest_key() > largest_key {
                largest_key = file.largest_key();
            }
        }

        Some(smallest_key.clone()..largest_key.clone())
    }

    /// Get the smallest and largest keys over all of the files in the provided levels.
    pub(crate) fn get_key_range_for_multiple_levels(
        levels: &[&[Arc<FileMetadata>]],
    ) -> Option<Range<InternalKey>> {
        let all_files: Vec<Arc<FileMetadata>> = levels
            .iter()
            .flat_map(|files| files.iter().map(Arc::clone))
            .collect();

        FileMetadata::get_key_range_for_files(&all_files)
    }
}

/**
Comparator that orders [`FileMetadata`] by their smallest keys and uses the file number as a tie
breaker.
*/
pub(crate) struct FileMetadataBySmallestKey;

impl Comparator<&Arc<FileMetadata>> for FileMetadataBySmallestKey {
    fn compare(a: &Arc<FileMetadata>, b: &Arc<FileMetadata>) -> Ordering {
        match a.smallest_key().cmp(b.smallest_key()) {
            Ordering::Equal => a.file_number().cmp(&b.file_number()),
            order => order,
        }
    }
}
