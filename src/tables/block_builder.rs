use integer_encoding::FixedInt;

use crate::config::SIZE_OF_U32_BYTES;
use crate::entry::{encode_entry, Entry};
use crate::key::InternalKey;

/**
Accumulates sorted entries into a single data block.

# Format

Entries are laid out back to back with the [entry encoding](crate::encode_entry). A trailer of
fixed-length `u32` values follows: the starting offset of each entry and then the entry count.
Readers binary search over the offsets without decoding the entries in between.

```text
+---------+-----+---------+----------+-----+----------+-------------+
| entry 0 | ... | entry n | offset 0 | ... | offset n | num entries |
+---------+-----+---------+----------+-----+----------+-------------+
```
*/
#[derive(Debug)]
pub(crate) struct BlockBuilder {
    /// Encoded entries, plus the trailer once finalized.
    buffer: Vec<u8>,

    /// Where each entry starts in `buffer`.
    entry_offsets: Vec<u32>,

    /// Set by [`BlockBuilder::finalize`] and cleared by [`BlockBuilder::reset`].
    sealed: bool,

    /// The most recently added key. Used to enforce ordering.
    maybe_previous_key: Option<InternalKey>,
}

/// Crate-only methods
impl BlockBuilder {
    pub(crate) fn new() -> Self {
        Self {
            buffer: vec![],
            entry_offsets: vec![],
            sealed: false,
            maybe_previous_key: None,
        }
    }

    /**
    Append an entry to the block.

    # Panics

    Panics if the block is sealed or if `key` does not sort after every key already in the block.
    Either case is a bug in the caller.
    */
    pub(crate) fn add_entry(&mut self, key: &InternalKey, value: &[u8]) {
        assert!(!self.sealed, "Cannot add entries to a sealed block.");
        if let Some(previous_key) = self.maybe_previous_key.as_ref() {
            assert!(
                previous_key < key,
                "Block entries must be added in sorted order."
            );
        }

        self.entry_offsets.push(self.buffer.len() as u32);
        self.buffer
            .extend(encode_entry(&Entry::from_internal_key(key, value)));
        self.maybe_previous_key = Some(key.clone());
    }

    /// Empty the builder so it can be reused for the next block without reallocating.
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.entry_offsets.clear();
        self.sealed = false;
        self.maybe_previous_key = None;
    }

    /**
    Write the trailer and return the finished block.

    The returned slice borrows the builder and is invalidated by [`BlockBuilder::reset`].
    */
    pub(crate) fn finalize(&mut self) -> &[u8] {
        let num_entries = self.entry_offsets.len() as u32;
        for offset in self
            .entry_offsets
            .iter()
            .copied()
            .chain(std::iter::once(num_entries))
        {
            self.buffer.extend_from_slice(&offset.encode_fixed_vec());
        }
        self.sealed = true;

        &self.buffer
    }

    /// Estimate the size of the block if it were finalized now.
    pub(crate) fn approximate_size(&self) -> usize {
        self.buffer.len() + (self.entry_offsets.len() + 1) * SIZE_OF_U32_BYTES
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entry_offsets.is_empty()
    }
}
