/*!
The cursor interface shared by every internal iterator of the database (memtables, table blocks,
table files, levels, and merges of all of these).
*/

use crate::errors::MistDBError;
use crate::key::InternalKey;

/**
A MistDB specific iterator implementation that has more cursor-like behavior.

The MistDB iterator differs from the [`std::iter::DoubleEndedIterator`] in that the MistDB iterator
moves one cursor back and forth on the range of values. The `DoubleEndedIterator` essentially moves
two pointers toward each other and ends iteration onces the two pointers cross.
*/
pub(crate) trait MistDbIterator {
    /// The type of key the iterator is ordered by.
    type Key;

    /// The error returned by failed seeks.
    type Error;

    /// The iterator is only valid if the cursor is currently positioned at a key-value pair.
    fn is_valid(&self) -> bool;

    /**
    Position cursor to the first key that is at or past the target.

    Returns an error if there was an issue seeking the target and sets the iterator to invalid.
    */
    fn seek(&mut self, target: &Self::Key) -> Result<(), Self::Error>;

    /**
    Position cursor to the first element.

    Returns an error if there was an issue seeking the target and sets the iterator to invalid.
    */
    fn seek_to_first(&mut self) -> Result<(), Self::Error>;

    /**
    Position cursor to the last element.

    Returns an error if there was an issue seeking the target and sets the iterator to invalid.
    */
    fn seek_to_last(&mut self) -> Result<(), Self::Error>;

    /**
    Move to the next element.

    Returns a tuple (&K, &V) at the position moved to. If the cursor was on the last element, `None`
    is returned.
    */
    fn next(&mut self) -> Option<(&Self::Key, &Vec<u8>)>;

    /**
    Move to the previous element.

    Returns a tuple (&K, &V) at the position moved to. If the cursor was on the first element,
    `None` is returned.
    */
    fn prev(&mut self) -> Option<(&Self::Key, &Vec<u8>)>;

    /**
    Return the key and value at the current cursor position.

    Returns a tuple (&K, &V) at current position if the iterator is valid. Otherwise, returns
    `None`.
    */
    fn current(&self) -> Option<(&Self::Key, &Vec<u8>)>;

    /**
    Take the first error encountered while moving the cursor with `next` or `prev`.

    Movement methods invalidate the iterator when they fail so callers that need to distinguish
    exhaustion from failure should check this when the iterator becomes invalid.
    */
    fn take_error(&mut self) -> Option<Self::Error> {
        None
    }
}

/// A boxed cursor over internal records that can be handed to other threads.
pub(crate) type BoxedInternalIterator =
    Box<dyn MistDbIterator<Key = InternalKey, Error = MistDBError> + Send>;
