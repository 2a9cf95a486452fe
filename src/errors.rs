/*!
This module contains error types specific to MistDB as well as wrappers and `From` implementations
for common errors to enable error propagation.
*/

use std::fmt;
use std::io;
use std::num::TryFromIntError;

use crate::compaction::CompactionWorkerError;
use crate::tables::errors::{BuilderError, ReadError};
use crate::versioning::errors::WriteError;

/// Alias for a [`Result`] that wraps a [`MistDBError`].
pub type MistDBResult<T> = Result<T, MistDBError>;

/// Top-level database errors.
#[derive(Clone, Debug, PartialEq)]
pub enum MistDBError {
    /**
    Variant for failures to open a database e.g. a bad path, missing permissions, an incompatible
    on-disk format, or a database lock held by someone else.
    */
    Open(String),

    /// Variant for errors stemming from top-level I/O operations.
    IO(DBIOError),

    /// Variant for a log record or an entry that could not be decoded.
    CorruptRecord(String),

    /// Variant for a table file that failed a checksum or bounds check.
    CorruptBlock(TableCorruptionMetadata),

    /// Variant for operations attempted after the database or iterator was closed.
    Closed,

    /// Variant for caller provided values that violate configured limits.
    InvalidArgument(String),

    /// Variant for lookup key parsing errors.
    KeyParsing(String),

    /// Variant for errors encountered during compaction.
    Compaction(CompactionWorkerError),

    /**
    Variant for when the database has stopped accepting writes because of a previous background
    failure. The message is the description of the original failure.
    */
    BadDatabaseState(String),
}

impl std::error::Error for MistDBError {}

impl fmt::Display for MistDBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MistDBError::Open(reason) => write!(f, "Failed to open the database. {}", reason),
            MistDBError::IO(base_err) => write!(f, "{}", base_err),
            MistDBError::CorruptRecord(reason) => write!(f, "Corrupt record: {}", reason),
            MistDBError::CorruptBlock(metadata) => write!(f, "{}", metadata),
            MistDBError::Closed => write!(f, "The database has already been closed."),
            MistDBError::InvalidArgument(reason) => write!(f, "{}", reason),
            MistDBError::KeyParsing(reason) => write!(f, "{}", reason),
            MistDBError::Compaction(base_err) => write!(f, "{}", base_err),
            MistDBError::BadDatabaseState(reason) => write!(
                f,
                "The database is refusing writes due to an earlier background error. {}",
                reason
            ),
        }
    }
}

impl From<io::Error> for MistDBError {
    fn from(err: io::Error) -> Self {
        MistDBError::IO(err.into())
    }
}

impl From<DBIOError> for MistDBError {
    fn from(err: DBIOError) -> Self {
        MistDBError::IO(err)
    }
}

impl From<LogIOError> for MistDBError {
    fn from(err: LogIOError) -> Self {
        match err {
            LogIOError::IO(base_err) => MistDBError::IO(base_err),
            LogIOError::Corruption(reason) => MistDBError::CorruptRecord(reason),
            LogIOError::Seralization(kind) => MistDBError::CorruptRecord(kind.to_string()),
        }
    }
}

impl From<BuilderError> for MistDBError {
    fn from(err: BuilderError) -> Self {
        match err {
            BuilderError::IO(base_err) => MistDBError::IO(base_err),
            _ => MistDBError::IO(DBIOError::new(io::ErrorKind::Other, err.to_string())),
        }
    }
}

impl From<WriteError> for MistDBError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::IO(base_err) => MistDBError::IO(base_err),
            WriteError::Log(log_err) => log_err.into(),
        }
    }
}

impl From<CompactionWorkerError> for MistDBError {
    fn from(err: CompactionWorkerError) -> Self {
        MistDBError::Compaction(err)
    }
}

/**
Wraps a [`std::io::Error`] so that it can be cloned and compared.

`std::io::Error` is neither `Clone` nor `PartialEq`, but database errors need to be both so that a
single background error can be reported to every subsequent caller.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct DBIOError {
    kind: io::ErrorKind,
    message: String,
}

/// Public methods
impl DBIOError {
    /// Create a new instance of [`DBIOError`].
    pub fn new(kind: io::ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Get the kind of I/O error.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }
}

impl std::error::Error for DBIOError {}

impl fmt::Display for DBIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<io::Error> for DBIOError {
    fn from(err: io::Error) -> Self {
        DBIOError::new(err.kind(), err.to_string())
    }
}

/// Describes a table file that failed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct TableCorruptionMetadata {
    /// The number of the offending table file.
    pub file_number: u64,

    /// What was wrong with the file.
    pub reason: String,
}

impl fmt::Display for TableCorruptionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Corrupt block in table file {}: {}",
            self.file_number, self.reason
        )
    }
}

/// Errors related to reading and writing log files i.e. write-ahead logs and manifests.
#[derive(Clone, Debug, PartialEq)]
pub enum LogIOError {
    /// Variant for errors that are related to IO.
    IO(DBIOError),

    /// Variant for IO issues where the cause is malformed data on the file system.
    Corruption(String),

    /**
    Variant for parsing issues that arise specifically from deserializing data from the
    file system.
    */
    Seralization(LogSerializationErrorKind),
}

/**
Different kinds of errors that can arise from serialization and deserialization activities in log
files.
*/
#[derive(Clone, Debug, PartialEq)]
pub enum LogSerializationErrorKind {
    /// Variant for integer conversions that overflowed the on-disk representation.
    FromInt(String),
    /// Variant for everything else.
    Other(String),
}

impl fmt::Display for LogSerializationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSerializationErrorKind::FromInt(reason) => write!(f, "{}", reason),
            LogSerializationErrorKind::Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for LogIOError {}

impl fmt::Display for LogIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogIOError::IO(base_err) => write!(f, "{}", base_err),
            LogIOError::Corruption(reason) => write!(f, "{}", reason),
            LogIOError::Seralization(kind) => write!(f, "{}", kind),
        }
    }
}

impl From<io::Error> for LogIOError {
    fn from(err: io::Error) -> Self {
        LogIOError::IO(err.into())
    }
}

impl From<TryFromIntError> for LogIOError {
    fn from(err: TryFromIntError) -> Self {
        LogIOError::Seralization(LogSerializationErrorKind::FromInt(err.to_string()))
    }
}

impl From<MistDBError> for LogIOError {
    fn from(err: MistDBError) -> Self {
        match err {
            MistDBError::IO(base_err) => LogIOError::IO(base_err),
            other => LogIOError::Corruption(other.to_string()),
        }
    }
}

/// Convert a table read error into a database error attributed to the given table file.
pub(crate) fn table_read_error(file_number: u64, err: ReadError) -> MistDBError {
    match err {
        ReadError::IO(base_err) => MistDBError::IO(base_err),
        other => MistDBError::CorruptBlock(TableCorruptionMetadata {
            file_number,
            reason: other.to_string(),
        }),
    }
}
