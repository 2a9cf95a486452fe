use integer_encoding::{VarIntReader, VarIntWriter};
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::io::{self, Cursor, Write};
use std::ops::Range;

use crate::errors::{MistDBError, MistDBResult};
use crate::key::InternalKey;
use crate::utils::io::{ReadHelpers, WriteHelpers};

use super::file_metadata::FileMetadata;

/**
Tags that mark the fields of a serialized [`VersionChangeManifest`].

Existing enum values should not be changed since they are serialized as part of the manifest file
format.
*/
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ManifestFieldTag {
    WalFileNumber = 1,
    NextFileNumber = 2,
    LastSequenceNumber = 3,
    CompactionPointer = 4,
    DeletedFile = 5,
    NewFile = 6,
}

impl TryFrom<u32> for ManifestFieldTag {
    type Error = MistDBError;

    fn try_from(value: u32) -> MistDBResult<ManifestFieldTag> {
        let tag = match value {
            1 => ManifestFieldTag::WalFileNumber,
            2 => ManifestFieldTag::NextFileNumber,
            3 => ManifestFieldTag::LastSequenceNumber,
            4 => ManifestFieldTag::CompactionPointer,
            5 => ManifestFieldTag::DeletedFile,
            6 => ManifestFieldTag::NewFile,
            _ => {
                return Err(MistDBError::CorruptRecord(format!(
                    "Found an unknown tag ({}) while parsing a version change manifest.",
                    value
                )))
            }
        };

        Ok(tag)
    }
}

/// A file to remove from a level.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct DeletedFile {
    /// The level to remove the file from.
    pub(crate) level: usize,

    /// The file number of the file to remove.
    pub(crate) file_number: u64,
}

/**
A manifest of changes and change information to be applied to a
[`VersionSet`](super::VersionSet).

# Serialization

A serialized manifest is a sequence of fields. Every field starts with a varint32 tag followed by
the data of the field. Fields that are not set are not serialized.
*/
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct VersionChangeManifest {
    /// The file number for the write-ahead log backing the active memtable.
    pub(crate) wal_file_number: Option<u64>,

    /// The last sequence number that is used in the changes.
    pub(crate) last_sequence_number: Option<u64>,

    /**
    The number to use when creating a new file.

    This information snapshotted from the version set for persistence to disk and is primarily used
    for recovery operations.
    */
    pub(crate) next_file_number: Option<u64>,

    /// Per-level keys at which the next compaction at that level should start.
    pub(crate) compaction_pointers: Vec<(usize, InternalKey)>,

    /// Files to remove from the next version.
    pub(crate) deleted_files: BTreeSet<DeletedFile>,

    /// New files to add to the next version with the level the file it should be added at.
    pub(crate) new_files: Vec<(usize, FileMetadata)>,
}

/// Crate-only methods
impl VersionChangeManifest {
    /**
    Add the specified file with the specified number.

    # Invariants

    The smallest and largest keys specified in the key range are actually the smallest and largest
    keys in the file.
    */
    pub(crate) fn add_file(
        &mut self,
        level: usize,
        file_number: u64,
        file_size: u64,
        key_range: Range<InternalKey>,
    ) {
        let metadata = FileMetadata::new(file_number, file_size, key_range.start, key_range.end);
        self.new_files.push((level, metadata));
    }

    /// Remove the specified file from the specified level.
    pub(crate) fn remove_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert(DeletedFile { level, file_number });
    }

    /// Record the key at which the next compaction of `level` should start.
    pub(crate) fn add_compaction_pointer(&mut self, level: usize, key: InternalKey) {
        self.compaction_pointers.push((level, key));
    }
}

impl From<&VersionChangeManifest> for Vec<u8> {
    fn from(manifest: &VersionChangeManifest) -> Self {
        let mut buf: Vec<u8> = vec![];
        // Writes to a vector cannot fail
        let _ = manifest.write_to(&mut buf);

        buf
    }
}

impl TryFrom<&[u8]> for VersionChangeManifest {
    type Error = MistDBError;

    fn try_from(buf: &[u8]) -> MistDBResult<VersionChangeManifest> {
        let mut reader = Cursor::new(buf);
        let mut manifest = VersionChangeManifest::default();

        while (reader.position() as usize) < buf.len() {
            let raw_tag: u32 = reader.read_varint().map_err(corrupt_manifest)?;
            match ManifestFieldTag::try_from(raw_tag)? {
                ManifestFieldTag::WalFileNumber => {
                    manifest.wal_file_number = Some(reader.read_varint().map_err(corrupt_manifest)?);
                }
                ManifestFieldTag::NextFileNumber => {
                    manifest.next_file_number =
                        Some(reader.read_varint().map_err(corrupt_manifest)?);
                }
                ManifestFieldTag::LastSequenceNumber => {
                    manifest.last_sequence_number =
                        Some(reader.read_varint().map_err(corrupt_manifest)?);
                }
                ManifestFieldTag::CompactionPointer => {
                    let level = reader.read_level().map_err(corrupt_manifest)?;
                    let key = read_internal_key(&mut reader)?;
                    manifest.compaction_pointers.push((level, key));
                }
                ManifestFieldTag::DeletedFile => {
                    let level = reader.read_level().map_err(corrupt_manifest)?;
                    let file_number = reader.read_varint().map_err(corrupt_manifest)?;
                    manifest.remove_file(level, file_number);
                }
                ManifestFieldTag::NewFile => {
                    let level = reader.read_level().map_err(corrupt_manifest)?;
                    let file_number = reader.read_varint().map_err(corrupt_manifest)?;
                    let file_size = reader.read_varint().map_err(corrupt_manifest)?;
                    let smallest_key = read_internal_key(&mut reader)?;
                    let largest_key = read_internal_key(&mut reader)?;
                    manifest.add_file(level, file_number, file_size, smallest_key..largest_key);
                }
            }
        }

        Ok(manifest)
    }
}

/// Private methods
impl VersionChangeManifest {
    /// Serialize the manifest fields to the writer.
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if let Some(wal_file_number) = self.wal_file_number {
            writer.write_varint(ManifestFieldTag::WalFileNumber as u32)?;
            writer.write_varint(wal_file_number)?;
        }

        if let Some(next_file_number) = self.next_file_number {
            writer.write_varint(ManifestFieldTag::NextFileNumber as u32)?;
            writer.write_varint(next_file_number)?;
        }

        if let Some(last_sequence_number) = self.last_sequence_number {
            writer.write_varint(ManifestFieldTag::LastSequenceNumber as u32)?;
            writer.write_varint(last_sequence_number)?;
        }

        for (level, key) in self.compaction_pointers.iter() {
            writer.write_varint(ManifestFieldTag::CompactionPointer as u32)?;
            writer.write_varint(*level as u32)?;
            writer.write_length_prefixed_slice(&key.as_bytes())?;
        }

        for deleted_file in self.deleted_files.iter() {
            writer.write_varint(ManifestFieldTag::DeletedFile as u32)?;
            writer.write_varint(deleted_file.level as u32)?;
            writer.write_varint(deleted_file.file_number)?;
        }

        for (level, file) in self.new_files.iter() {
            writer.write_varint(ManifestFieldTag::NewFile as u32)?;
            writer.write_varint(*level as u32)?;
            writer.write_varint(file.file_number())?;
            writer.write_varint(file.get_file_size())?;
            writer.write_length_prefixed_slice(&file.smallest_key().as_bytes())?;
            writer.write_length_prefixed_slice(&file.largest_key().as_bytes())?;
        }

        Ok(())
    }
}

/// Read a length-prefixed, serialized internal key.
fn read_internal_key(reader: &mut Cursor<&[u8]>) -> MistDBResult<InternalKey> {
    let raw_key = reader
        .read_length_prefixed_slice()
        .map_err(corrupt_manifest)?;

    InternalKey::try_from(raw_key).map_err(|err| MistDBError::CorruptRecord(err.to_string()))
}

fn corrupt_manifest(err: io::Error) -> MistDBError {
    MistDBError::CorruptRecord(format!(
        "Failed to parse a version change manifest. Error: {}",
        err
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::key::Operation;

    use super::*;

    #[test]
    fn a_manifest_with_every_field_set_survives_serialization() {
        let mut manifest = VersionChangeManifest {
            wal_file_number: Some(12),
            last_sequence_number: Some(3_000_000_000),
            next_file_number: Some(40),
            ..VersionChangeManifest::default()
        };
        manifest.add_compaction_pointer(
            1,
            InternalKey::new(b"pointer".to_vec(), 77, Operation::Put),
        );
        manifest.remove_file(0, 3);
        manifest.remove_file(2, 9);
        manifest.add_file(
            1,
            38,
            4096,
            InternalKey::new(b"a".to_vec(), 5, Operation::Put)
                ..InternalKey::new(b"q".to_vec(), 7, Operation::Delete),
        );

        let serialized = Vec::<u8>::from(&manifest);
        let deserialized = VersionChangeManifest::try_from(serialized.as_slice()).unwrap();

        assert_eq!(deserialized, manifest);
        assert_eq!(
            deserialized.new_files[0].1.largest_key().get_operation(),
            Operation::Delete
        );
    }

    #[test]
    fn an_empty_manifest_serializes_to_nothing() {
        let manifest = VersionChangeManifest::default();
        assert!(Vec::<u8>::from(&manifest).is_empty());
        assert_eq!(
            VersionChangeManifest::try_from(&[][..]).unwrap(),
            VersionChangeManifest::default()
        );
    }

    #[test]
    fn malformed_manifests_fail_to_parse() {
        // Unknown tag
        assert!(matches!(
            VersionChangeManifest::try_from(&[99][..]),
            Err(MistDBError::CorruptRecord(_))
        ));

        // Level past the maximum number of levels
        assert!(VersionChangeManifest::try_from(&[5, 20, 1][..]).is_err());

        // New file with a truncated key
        let mut manifest = VersionChangeManifest::default();
        manifest.add_file(
            0,
            1,
            10,
            InternalKey::new(b"a".to_vec(), 1, Operation::Put)
                ..InternalKey::new(b"b".to_vec(), 2, Operation::Put),
        );
        let serialized = Vec::<u8>::from(&manifest);
        assert!(VersionChangeManifest::try_from(&serialized[..serialized.len() - 3]).is_err());
    }
}
