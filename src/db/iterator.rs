use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{MistDBError, MistDBResult};
use crate::iterator::MistDbIterator;
use crate::key::{InternalKey, Operation};
use crate::versioning::file_iterators::MergingIterator;

use super::ReadState;

/// The direction that a [`DatabaseIterator`] last moved in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    /// The inner iterator is positioned at the record that yielded the current entry.
    Forward,

    /// The inner iterator is positioned before every record of the current user key.
    Reverse,
}

/// The resources held by an open [`DatabaseIterator`].
struct PinnedState {
    /**
    The memtables and version the iterator reads from.

    Holding these keeps the table files of the version from being removed.
    */
    _read_state: Arc<ReadState>,

    /// Merges the records of the memtables and every table file.
    inner: MergingIterator,
}

/**
An iterator over the user keys of the database in byte-wise order.

Only the newest value of every key that was visible when the iterator was created is yielded. Deleted
keys are skipped. The iterator is a point in time view and pins the files that it reads until it is
closed or dropped.
*/
pub struct DatabaseIterator {
    /// Set when the database is closed.
    is_shutting_down: Arc<AtomicBool>,

    /// Records with a sequence number larger than this are invisible to the iterator.
    snapshot_sequence_number: u64,

    /// `None` once the iterator is closed.
    maybe_pinned_state: Option<PinnedState>,

    /// The direction of the last move.
    direction: Direction,

    /// Whether the iterator is positioned at an entry.
    is_valid: bool,

    /// The user key of the current entry.
    current_key: Vec<u8>,

    /// The value of the current entry.
    current_value: Vec<u8>,

    /// The first error encountered while moving the iterator.
    maybe_error: Option<MistDBError>,
}

/// Crate-only methods
impl DatabaseIterator {
    /// Create a new [`DatabaseIterator`].
    pub(crate) fn new(
        is_shutting_down: Arc<AtomicBool>,
        read_state: Arc<ReadState>,
        inner: MergingIterator,
        snapshot_sequence_number: u64,
    ) -> Self {
        Self {
            is_shutting_down,
            snapshot_sequence_number,
            maybe_pinned_state: Some(PinnedState {
                _read_state: read_state,
                inner,
            }),
            direction: Direction::Forward,
            is_valid: false,
            current_key: vec![],
            current_value: vec![],
            maybe_error: None,
        }
    }
}

/// Public methods
impl DatabaseIterator {
    /// Returns true if the iterator is positioned at an entry.
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Position the iterator at the first key of the database.
    pub fn seek_to_first(&mut self) -> MistDBResult<()> {
        self.check_open()?;
        self.direction = Direction::Forward;
        self.inner_mut()?.seek_to_first()?;
        self.find_next_user_entry(None);

        self.status()
    }

    /// Position the iterator at the last key of the database.
    pub fn seek_to_last(&mut self) -> MistDBResult<()> {
        self.check_open()?;
        self.direction = Direction::Reverse;
        self.inner_mut()?.seek_to_last()?;
        self.find_prev_user_entry();

        self.status()
    }

    /// Position the iterator at the first key that is at or past `target`.
    pub fn seek(&mut self, target: &[u8]) -> MistDBResult<()> {
        self.check_open()?;
        self.direction = Direction::Forward;
        let seek_key = InternalKey::new_for_seeking(target.to_vec(), self.snapshot_sequence_number);
        self.inner_mut()?.seek(&seek_key)?;
        self.find_next_user_entry(None);

        self.status()
    }

    /**
    Move to the next key.

    Returns the key and value moved to. Returns `None` and invalidates the iterator if the iterator
    was at the last key. Use [`DatabaseIterator::status`] to distinguish the end of the iterator from
    a failure.
    */
    pub fn next(&mut self) -> Option<(&[u8], &[u8])> {
        if !self.is_valid || self.check_open().is_err() {
            self.invalidate();
            return None;
        }

        let skip_key = std::mem::take(&mut self.current_key);
        let inner = self.maybe_pinned_state.as_mut().map(|pinned| &mut pinned.inner)?;
        if self.direction == Direction::Reverse {
            // The inner iterator is before the records of the current key. Move it back onto them.
            self.direction = Direction::Forward;
            if inner.is_valid() {
                inner.next();
            } else if let Err(seek_err) = inner.seek_to_first() {
                self.record_error(seek_err);
                self.invalidate();
                return None;
            }
        } else {
            inner.next();
        }

        self.find_next_user_entry(Some(skip_key));
        self.current()
    }

    /**
    Move to the previous key.

    Returns the key and value moved to. Returns `None` and invalidates the iterator if the iterator
    was at the first key.
    */
    pub fn prev(&mut self) -> Option<(&[u8], &[u8])> {
        if !self.is_valid || self.check_open().is_err() {
            self.invalidate();
            return None;
        }

        if self.direction == Direction::Forward {
            // The inner iterator is at the current entry. Move it before every record of the
            // current key.
            let inner = self.maybe_pinned_state.as_mut().map(|pinned| &mut pinned.inner)?;
            loop {
                match inner.prev() {
                    Some((key, _)) if key.get_user_key() < self.current_key.as_slice() => break,
                    Some(_) => continue,
                    None => {
                        self.invalidate();
                        self.collect_inner_error();
                        return None;
                    }
                }
            }

            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
        self.current()
    }

    /// Get the key at the current position.
    pub fn key(&self) -> Option<&[u8]> {
        self.current().map(|(key, _)| key)
    }

    /// Get the value at the current position.
    pub fn value(&self) -> Option<&[u8]> {
        self.current().map(|(_, value)| value)
    }

    /// Get the key and value at the current position.
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        if !self.is_valid {
            return None;
        }

        Some((self.current_key.as_slice(), self.current_value.as_slice()))
    }

    /// Get the first error encountered by the iterator, if any.
    pub fn status(&self) -> MistDBResult<()> {
        match self.maybe_error.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /**
    Close the iterator and release the files it pins.

    Any further seek fails with [`MistDBError::Closed`].
    */
    pub fn close(&mut self) {
        self.invalidate();
        self.maybe_pinned_state = None;
    }
}

/// Private methods
impl DatabaseIterator {
    /// Fail if the iterator or the database was closed.
    fn check_open(&self) -> MistDBResult<()> {
        if self.maybe_pinned_state.is_none() || self.is_shutting_down.load(Ordering::Acquire) {
            return Err(MistDBError::Closed);
        }

        Ok(())
    }

    /// Get the merged iterator over the pinned records.
    fn inner_mut(&mut self) -> MistDBResult<&mut MergingIterator> {
        self.maybe_pinned_state
            .as_mut()
            .map(|pinned| &mut pinned.inner)
            .ok_or(MistDBError::Closed)
    }

    fn invalidate(&mut self) {
        self.is_valid = false;
        self.current_key.clear();
        self.current_value.clear();
    }

    fn record_error(&mut self, err: MistDBError) {
        if self.maybe_error.is_none() {
            self.maybe_error = Some(err);
        }
    }

    /// Move an error from the inner iterator to the iterator status.
    fn collect_inner_error(&mut self) {
        let maybe_inner_error = self
            .maybe_pinned_state
            .as_mut()
            .and_then(|pinned| pinned.inner.take_error());
        if let Some(inner_err) = maybe_inner_error {
            self.record_error(inner_err);
        }
    }

    /**
    Move the inner iterator forward to the newest visible record of the next user key that was not
    deleted, starting at the current inner position.

    Records of user keys at or before `maybe_skip_key` are hidden.
    */
    fn find_next_user_entry(&mut self, maybe_skip_key: Option<Vec<u8>>) {
        let snapshot = self.snapshot_sequence_number;
        let mut maybe_skip_key = maybe_skip_key;
        let mut found: Option<(Vec<u8>, Vec<u8>)> = None;

        if let Some(pinned) = self.maybe_pinned_state.as_mut() {
            let inner = &mut pinned.inner;
            while let Some((key, value)) = inner.current() {
                if key.get_sequence_number() <= snapshot {
                    let is_hidden = maybe_skip_key
                        .as_deref()
                        .map_or(false, |skip_key| key.get_user_key() <= skip_key);
                    match key.get_operation() {
                        Operation::Delete => {
                            // Arrange to skip every older record of this key
                            maybe_skip_key = Some(key.get_user_key().to_vec());
                        }
                        Operation::Put if !is_hidden => {
                            found = Some((key.get_user_key().to_vec(), value.clone()));
                            break;
                        }
                        Operation::Put => {}
                    }
                }

                inner.next();
            }
        }

        match found {
            Some((key, value)) => {
                self.is_valid = true;
                self.current_key = key;
                self.current_value = value;
            }
            None => {
                self.invalidate();
                self.collect_inner_error();
            }
        }
    }

    /**
    Move the inner iterator backward past every record of the previous user key that was not
    deleted, saving the newest visible record of that key as the current entry.
    */
    fn find_prev_user_entry(&mut self) {
        let snapshot = self.snapshot_sequence_number;
        let mut last_operation = Operation::Delete;
        let mut saved_key: Vec<u8> = vec![];
        let mut saved_value: Vec<u8> = vec![];

        if let Some(pinned) = self.maybe_pinned_state.as_mut() {
            let inner = &mut pinned.inner;
            let mut maybe_record = inner
                .current()
                .map(|(key, value)| (key.clone(), value.clone()));
            while let Some((key, value)) = maybe_record {
                if key.get_sequence_number() <= snapshot {
                    if last_operation != Operation::Delete
                        && key.get_user_key() < saved_key.as_slice()
                    {
                        // We encountered a non-deleted value in entries for previous keys
                        break;
                    }

                    last_operation = key.get_operation();
                    match last_operation {
                        Operation::Delete => {
                            saved_key.clear();
                            saved_value.clear();
                        }
                        Operation::Put => {
                            saved_key = key.get_user_key().to_vec();
                            saved_value = value;
                        }
                    }
                }

                maybe_record = inner
                    .prev()
                    .map(|(key, value)| (key.clone(), value.clone()));
            }
        }

        if last_operation == Operation::Delete {
            // End of iteration
            self.invalidate();
            self.direction = Direction::Forward;
            self.collect_inner_error();
        } else {
            self.is_valid = true;
            self.current_key = saved_key;
            self.current_value = saved_value;
        }
    }
}

impl fmt::Debug for DatabaseIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseIterator")
            .field("snapshot_sequence_number", &self.snapshot_sequence_number)
            .field("is_closed", &self.maybe_pinned_state.is_none())
            .field("direction", &self.direction)
            .field("is_valid", &self.is_valid)
            .finish()
    }
}
