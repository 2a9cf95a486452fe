//! Shared utilities for compaction related activities.

use crate::DbOptions;

/**
Get the maximum number of bytes that a level can overlap with it's grandparent (level + 2).

This bounds the placement of a new table file from a memtable flush and the amount of grandparent
data a single compaction output file may overlap.
*/
pub(crate) fn max_grandparent_overlap_bytes_from_options(options: &DbOptions) -> u64 {
    options.max_file_size as u64 * 10
}

/**
Get the maximum number of bytes that a compaction may grow to when expanding its inputs in the
lower level.
*/
pub(crate) fn expanded_compaction_byte_size_limit(options: &DbOptions) -> u64 {
    options.max_file_size as u64 * 25
}
