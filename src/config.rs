/*!
This module contains global configuration constants for MistDB.

These values shape the file formats and the level structure. Values that callers are expected to tune live on [`DbOptions`](crate::DbOptions) instead.
*/

use std::convert::TryFrom;

use crate::errors::MistDBError;

/// The size of a `u32` in bytes.
pub(crate) const SIZE_OF_U32_BYTES: usize = 4;

/// The maximum number of SSTable levels that is allowed.
pub(crate) const MAX_NUM_LEVELS: usize = 7;

/// Level-0 compaction is started when we hit this many files.
pub(crate) const L0_COMPACTION_TRIGGER: usize = 4;

/**
Soft limit on the number of level-0 files.

We slow down writes at this point.
*/
pub(crate) const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/**
Maximum number of level-0 files.

We stop writes at this point.
*/
pub(crate) const L0_STOP_WRITES_TRIGGER: usize = 12;

/**
Maximum level to which a new compacted memtable is pushed if it does not create overlap in keys.

We try to push to level 2 to avoid the relatively expensive level 0 to level 1 compactions and to
avoid some expensive manifest file operations. We do not push all the way to the largest level since
that can generate a lot of wasted disk space if the same key space is being repeatedly overwritten.
*/
pub(crate) const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// The maximum total size of level 1 in bytes. Every level after that is 10x larger.
pub(crate) const LEVEL_ONE_MAX_BYTES: f64 = 10. * 1024. * 1024.;

/**
The compression applied to blocks of a table file.

Existing enum values should not be changed since they are serialized as part of the table file
format.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableFileCompressionType {
    /// Blocks are stored as-is.
    None = 0,
    /// Blocks are compressed with the raw Snappy format.
    Snappy = 1,
}

impl TryFrom<u8> for TableFileCompressionType {
    type Error = MistDBError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TableFileCompressionType::None),
            1 => Ok(TableFileCompressionType::Snappy),
            _ => Err(MistDBError::KeyParsing(format!(
                "There was a problem parsing the table file compression type. The value received \
                was {}",
                value
            ))),
        }
    }
}
