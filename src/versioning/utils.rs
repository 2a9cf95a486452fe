//! Contains utilities used for various versioning operations.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::key::InternalKey;

use super::file_metadata::FileMetadata;

/// Sums the file sizes for the specified vector of file metadata.
pub(crate) fn sum_file_sizes<F: AsRef<FileMetadata>>(files: &[F]) -> u64 {
    files
        .iter()
        .map(|metadata| metadata.as_ref().get_file_size())
        .sum()
}

/**
Binary search a sorted set of disjoint files for the first file whose largest key is >= the
specified target key.

Returns `None` if every file ends before `target`.
*/
pub(crate) fn find_file_with_upper_bound_range(
    files: &[Arc<FileMetadata>],
    target: &InternalKey,
) -> Option<usize> {
    let index = files.partition_point(|file| file.largest_key().cmp(target) == Ordering::Less);

    if index < files.len() {
        Some(index)
    } else {
        None
    }
}
