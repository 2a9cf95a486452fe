/*!
This module contains the representation of a single mutation stored by the database and its
serialization.

An entry is described by a user supplied key, the sequence number of the write that produced it,
and--optionally--a user supplied value. The value is absent for delete operations. In industry
parlance, the serialized delete operation is a "tombstone".

Serialized entries are the unit of data for write-ahead log records and for table data blocks.
*/

use integer_encoding::{FixedInt, VarInt};

use crate::errors::{MistDBError, MistDBResult};
use crate::key::{InternalKey, Operation};

/// The number of bytes used to store the sequence number of a serialized entry.
const SEQUENCE_NUMBER_SIZE_BYTES: usize = 8;

/**
A versioned mutation of a key.

# Serialization

When serialized an [`Entry`] will have the following format:

1. The key is represented by its length encoded as a 32-bit integer with variable length and the
   bytes of the key
1. The operation as a 1-byte integer with fixed-length encoding. This acts as the tombstone flag.
1. If the operation is a `Put` operation, the value is encoded in the same way as the key
1. The sequence number as a 64-bit integer with fixed-length encoding
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    /// The user provided key.
    user_key: Vec<u8>,

    /// The value of a `Put` or `None` for a tombstone.
    value: Option<Vec<u8>>,

    /// The sequence number of the write that produced this entry.
    sequence_number: u64,
}

/// Public methods
impl Entry {
    /// Create an entry that sets `user_key` to `value`.
    pub fn new_put(user_key: Vec<u8>, value: Vec<u8>, sequence_number: u64) -> Self {
        Self {
            user_key,
            value: Some(value),
            sequence_number,
        }
    }

    /// Create a tombstone for `user_key`.
    pub fn new_delete(user_key: Vec<u8>, sequence_number: u64) -> Self {
        Self {
            user_key,
            value: None,
            sequence_number,
        }
    }

    /// Get a reference to the user supplied key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Get a reference to the value. This is `None` for tombstones.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Get the sequence number of the entry.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Get the operation that produced the entry.
    pub fn operation(&self) -> Operation {
        if self.value.is_some() {
            Operation::Put
        } else {
            Operation::Delete
        }
    }

    /// Returns true if the entry marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Crate-only methods
impl Entry {
    /**
    Create an entry from an internal key and the value stored alongside it.

    Values stored with tombstones are ignored.
    */
    pub(crate) fn from_internal_key(key: &InternalKey, value: &[u8]) -> Self {
        match key.get_operation() {
            Operation::Put => Entry::new_put(
                key.get_user_key().to_vec(),
                value.to_vec(),
                key.get_sequence_number(),
            ),
            Operation::Delete => {
                Entry::new_delete(key.get_user_key().to_vec(), key.get_sequence_number())
            }
        }
    }

    /// Get the internal key that orders this entry.
    pub(crate) fn internal_key(&self) -> InternalKey {
        InternalKey::new(
            self.user_key.clone(),
            self.sequence_number,
            self.operation(),
        )
    }

    /// Split the entry into its internal key and its value. Tombstones get an empty value.
    pub(crate) fn into_parts(self) -> (InternalKey, Vec<u8>) {
        let operation = self.operation();
        (
            InternalKey::new(self.user_key, self.sequence_number, operation),
            self.value.unwrap_or_default(),
        )
    }

    /// The number of bytes the entry occupies when serialized.
    pub(crate) fn encoded_size(&self) -> usize {
        let value_size = self
            .value
            .as_ref()
            .map_or(0, |value| (value.len() as u32).required_space() + value.len());

        (self.user_key.len() as u32).required_space()
            + self.user_key.len()
            + 1
            + value_size
            + SEQUENCE_NUMBER_SIZE_BYTES
    }
}

impl From<&Entry> for Vec<u8> {
    fn from(entry: &Entry) -> Vec<u8> {
        encode_entry(entry)
    }
}

/// Serialize an [`Entry`] to bytes.
pub fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entry.encoded_size());

    // Encode the key with a 32-bit varint of the length and then the key data
    buf.extend(u32::encode_var_vec(entry.user_key.len() as u32));
    buf.extend(&entry.user_key);
    buf.push(entry.operation() as u8);

    if let Some(value) = entry.value.as_ref() {
        buf.extend(u32::encode_var_vec(value.len() as u32));
        buf.extend(value);
    }

    buf.extend(entry.sequence_number.encode_fixed_vec());

    buf
}

/**
Deserialize an [`Entry`] from the front of `buf`.

Returns the entry and the number of bytes of `buf` that were consumed. Trailing bytes are left
alone so that entries can be read from a buffer of consecutively encoded entries.

# Errors

Fails with [`MistDBError::CorruptRecord`] if a length prefix points past the end of the buffer, the
operation tag is unknown, or the buffer ends before the sequence number.
*/
pub fn decode_entry(buf: &[u8]) -> MistDBResult<(Entry, usize)> {
    let mut cursor: usize = 0;

    let user_key = read_length_prefixed(buf, &mut cursor, "key")?;

    if cursor >= buf.len() {
        return Err(MistDBError::CorruptRecord(
            "The buffer ended before the operation tag of the entry.".to_string(),
        ));
    }
    let operation = Operation::try_from(buf[cursor])
        .map_err(|err| MistDBError::CorruptRecord(err.to_string()))?;
    cursor += 1;

    let value = match operation {
        Operation::Put => Some(read_length_prefixed(buf, &mut cursor, "value")?),
        Operation::Delete => None,
    };

    if buf.len() - cursor < SEQUENCE_NUMBER_SIZE_BYTES {
        return Err(MistDBError::CorruptRecord(format!(
            "The buffer ended before the sequence number of the entry. Needed {} bytes but only {} \
            remained.",
            SEQUENCE_NUMBER_SIZE_BYTES,
            buf.len() - cursor
        )));
    }
    let sequence_number = u64::decode_fixed(&buf[cursor..cursor + SEQUENCE_NUMBER_SIZE_BYTES]);
    cursor += SEQUENCE_NUMBER_SIZE_BYTES;

    let entry = Entry {
        user_key,
        value,
        sequence_number,
    };

    Ok((entry, cursor))
}

/// Read a varint32 length prefixed byte string starting at `cursor` and advance the cursor.
fn read_length_prefixed(buf: &[u8], cursor: &mut usize, field_name: &str) -> MistDBResult<Vec<u8>> {
    let (length, length_size) = u32::decode_var(&buf[*cursor..]).ok_or_else(|| {
        MistDBError::CorruptRecord(format!(
            "Could not decode the length prefix of the entry {}.",
            field_name
        ))
    })?;
    let start = *cursor + length_size;
    let end = start + length as usize;
    if end > buf.len() {
        return Err(MistDBError::CorruptRecord(format!(
            "The length prefix of the entry {} ({} bytes) exceeds the remaining buffer size ({} \
            bytes).",
            field_name,
            length,
            buf.len() - start
        )));
    }

    *cursor = end;
    Ok(buf[start..end].to_vec())
}
