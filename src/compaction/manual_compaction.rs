// Copyright (c) 2022 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::ops::Range;

use crate::key::InternalKey;

/**
A request to compact the files of a level that overlap a key range into the next level.

The range is compacted over several rounds because a single compaction is bounded in size. Each
round moves the start of the range past the files it compacted.
*/
#[derive(Debug)]
pub(crate) struct ManualCompaction {
    /// The level to compact.
    level: usize,

    /// Set once the range is fully compacted or a round failed.
    done: bool,

    /// Start of the remaining range. `None` is unbounded.
    begin: Option<InternalKey>,

    /// End of the range. `None` is unbounded.
    end: Option<InternalKey>,
}

/// Crate-only methods
impl ManualCompaction {
    /// Create a new [`ManualCompaction`].
    pub(crate) fn new(level: usize, begin: Option<InternalKey>, end: Option<InternalKey>) -> Self {
        Self {
            level,
            done: false,
            begin,
            end,
        }
    }

    /// Get the level being compacted.
    pub(crate) fn level(&self) -> usize {
        self.level
    }

    /// Returns true if there is nothing left to compact.
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Stop the manual compaction.
    pub(crate) fn mark_done(&mut self) {
        self.done = true;
    }

    /// Get a copy of the range that is left to compact.
    pub(crate) fn remaining_range(&self) -> Range<Option<InternalKey>> {
        self.begin.clone()..self.end.clone()
    }

    /**
    Record the outcome of picking files for a round.

    `maybe_largest_compacted_key` is the largest key of the files picked at the compaction level.
    `None` means no file overlapped the remaining range, which finishes the manual compaction.
    */
    pub(crate) fn record_round(&mut self, maybe_largest_compacted_key: Option<InternalKey>) {
        match maybe_largest_compacted_key {
            Some(largest_key) => self.begin = Some(largest_key),
            None => self.done = true,
        }
    }
}
