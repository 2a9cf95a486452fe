/*!
This module contains the internal key used to index values in MistDB.

Entries in the database are represented by an internal key that adds additional metadata to the
user provided key, i.e. a sequence number and the operation that was performed.

The sequence number is a global, monotonically increasing 64-bit unsigned int. It is never reset.
Because writes are append-only, there may be multiple records with the same user key. The sequence
number is used to denote which of the stored records is the most recent version.
*/

use integer_encoding::FixedInt;
use std::cmp::Ordering;
use std::convert::{TryFrom, TryInto};

use crate::errors::{MistDBError, MistDBResult};
use crate::utils::comparator::compare;

/// The largest sequence number that can be assigned.
pub(crate) const MAX_SEQUENCE_NUMBER: u64 = u64::MAX;

/// The size of the sequence number and operation appended to a serialized user key.
const KEY_TRAILER_SIZE_BYTES: usize = 8 + 1;

/**
This is the actual key used by MistDB. It is the user provided key with additional metadata.

# Ordering

Keys are ordered by their user key in ascending byte-wise order. Keys with the same user key are
ordered by their sequence number in descending order so that the most recent record for a user key
is encountered first.

# Serialization

When the key is serialized to write to disk, it has the following layout:
1. The user key
1. The sequence number with a fixed-length encoding
1. The operation as an 8-bit integer with fixed-length encoding
*/
#[derive(Clone, Debug, Eq, Hash)]
pub(crate) struct InternalKey {
    /// The user suplied key.
    user_key: Vec<u8>,
    /// The sequence number of the operation associated with this generated key.
    sequence_number: u64,
    /// The operation being performed with this key.
    operation: Operation,
}

/// Crate-only methods
impl InternalKey {
    /// Construct a new [`InternalKey`].
    pub(crate) fn new(user_key: Vec<u8>, sequence_number: u64, operation: Operation) -> Self {
        InternalKey {
            user_key,
            sequence_number,
            operation,
        }
    }

    /**
    Construct a new [`InternalKey`] for seek operations.

    The resulting key is ordered before every record for `user_key` that has a sequence number less
    than or equal to `sequence_number`.
    */
    pub(crate) fn new_for_seeking(user_key: Vec<u8>, sequence_number: u64) -> Self {
        InternalKey {
            user_key,
            sequence_number,
            operation: Operation::Put,
        }
    }

    /// Return the user key.
    pub(crate) fn get_user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Get the sequence number of the key.
    pub(crate) fn get_sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Get the operation the key was written with.
    pub(crate) fn get_operation(&self) -> Operation {
        self.operation
    }

    /// Returns a byte representation of the key.
    pub(crate) fn as_bytes(&self) -> Vec<u8> {
        // size = size of user key + 8 bytes for the sequence number + 1 byte for the operation
        let mut buf: Vec<u8> = Vec::with_capacity(self.user_key.len() + KEY_TRAILER_SIZE_BYTES);
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&self.sequence_number.encode_fixed_vec());
        buf.push(self.operation as u8);

        buf
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match compare(&self.user_key, &other.user_key) {
            // Sequence numbers are sorted in descending order to bias toward recent operations.
            Ordering::Equal => other.sequence_number.cmp(&self.sequence_number),
            non_equal => non_equal,
        }
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        // A sequence number is assigned per operation, so the operation tag is implied by the
        // sequence number and is not compared.
        self.cmp(other).is_eq()
    }
}

impl TryFrom<&[u8]> for InternalKey {
    type Error = MistDBError;

    fn try_from(buf: &[u8]) -> MistDBResult<InternalKey> {
        if buf.len() < KEY_TRAILER_SIZE_BYTES {
            return Err(MistDBError::KeyParsing(format!(
                "The provided buffer was too small. It needs to be at least {} bytes but was {}.",
                KEY_TRAILER_SIZE_BYTES,
                buf.len(),
            )));
        }

        let trailer_start_index = buf.len() - KEY_TRAILER_SIZE_BYTES;
        let sequence_number_end_index = buf.len() - 1;
        let user_key = &buf[..trailer_start_index];
        let sequence_number =
            u64::decode_fixed(&buf[trailer_start_index..sequence_number_end_index]);
        let operation: Operation = buf[buf.len() - 1].try_into()?;

        Ok(InternalKey::new(
            user_key.to_vec(),
            sequence_number,
            operation,
        ))
    }
}

impl TryFrom<Vec<u8>> for InternalKey {
    type Error = MistDBError;

    fn try_from(buf: Vec<u8>) -> MistDBResult<InternalKey> {
        InternalKey::try_from(buf.as_slice())
    }
}

impl From<&InternalKey> for Vec<u8> {
    fn from(key: &InternalKey) -> Vec<u8> {
        key.as_bytes()
    }
}

/**
The operation that is being applied to an entry in the database.

Existing enum values should not be changed since they are serialized as part of the log and table
file formats.
*/
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// This represents a tombstone. There should not be a value set for the operation.
    Delete = 0,
    /// Add a new key-value pair or updates an existing key-value pair.
    Put = 1,
}

impl TryFrom<u8> for Operation {
    type Error = MistDBError;

    fn try_from(value: u8) -> MistDBResult<Operation> {
        let operation = match value {
            0 => Operation::Delete,
            1 => Operation::Put,
            _ => {
                return Err(MistDBError::KeyParsing(format!(
                    "There was an problem parsing the operation. The value received was {}",
                    value
                )))
            }
        };

        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn keys_with_the_same_user_key_are_ordered_newest_first() {
        let older = InternalKey::new(b"apple".to_vec(), 3, Operation::Put);
        let newer = InternalKey::new(b"apple".to_vec(), 9, Operation::Delete);

        assert!(newer < older);
        assert!(InternalKey::new_for_seeking(b"apple".to_vec(), MAX_SEQUENCE_NUMBER) < newer);
    }

    #[test]
    fn keys_are_ordered_by_user_key_first() {
        let a = InternalKey::new(b"a".to_vec(), 1, Operation::Put);
        let b = InternalKey::new(b"b".to_vec(), 100, Operation::Put);
        let ab = InternalKey::new(b"ab".to_vec(), 50, Operation::Put);

        assert!(a < ab);
        assert!(ab < b);
    }

    #[test]
    fn internal_keys_can_be_serialized_and_parsed() {
        let key = InternalKey::new(b"batmann".to_vec(), 1_234_567, Operation::Delete);
        let serialized = key.as_bytes();

        assert_eq!(serialized.len(), b"batmann".len() + 9);

        let parsed = InternalKey::try_from(serialized).unwrap();
        assert_eq!(parsed.get_user_key(), b"batmann");
        assert_eq!(parsed.get_sequence_number(), 1_234_567);
        assert_eq!(parsed.get_operation(), Operation::Delete);
    }

    #[test]
    fn parsing_a_buffer_smaller_than_the_trailer_fails() {
        assert!(InternalKey::try_from(vec![1, 2, 3]).is_err());
    }

    #[test]
    fn parsing_an_unknown_operation_fails() {
        let mut serialized = InternalKey::new(b"k".to_vec(), 1, Operation::Put).as_bytes();
        let last_index = serialized.len() - 1;
        serialized[last_index] = 7;

        assert!(InternalKey::try_from(serialized).is_err());
    }
}
