/*!
This module contains error types specific to table operations as well as wrappers and `From`
implementations for common errors to enable error propagation.
*/

use std::{fmt, io};

use crate::errors::DBIOError;

use super::footer::SIZE_OF_FOOTER_BYTES;

/// Result that wraps [`ReadError`].
pub type TableResult<T> = Result<T, ReadError>;

/// Errors that can result from a read operation.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadError {
    /// Variant for parsing errors.
    FailedToParse(String),

    /// Variant for footer serialiation errors where the value is the size of the serialized buffer.
    FooterSerialization(usize),

    /// Variant for a block or file whose contents do not match the stored checksum.
    ChecksumMismatch(String),

    /// Variant for block decompression issues.
    BlockDecompression(String),

    /// Variant for IO errors.
    IO(DBIOError),
}

impl std::error::Error for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::FailedToParse(msg) => {
                write!(f, "{}", msg)
            }
            ReadError::FooterSerialization(actual_buffer_size) => {
                write!(
                    f,
                    "Failed to serialize the footer. The length of the serialized buffer was \
                    expected to be {} but was {}",
                    SIZE_OF_FOOTER_BYTES, actual_buffer_size
                )
            }
            ReadError::ChecksumMismatch(msg) => write!(f, "Checksum mismatch: {}", msg),
            ReadError::BlockDecompression(base_err) => {
                write!(
                    f,
                    "Failed to decompress a block from the file. The original error was {}",
                    base_err
                )
            }
            ReadError::IO(base_err) => write!(f, "{}", base_err),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        ReadError::IO(err.into())
    }
}

/// Result that wraps [`BuilderError`].
pub type TableBuildResult<T> = Result<T, BuilderError>;

/// Errors that can result from building a table file.
#[derive(Clone, Debug, PartialEq)]
pub enum BuilderError {
    /// Variant for attempting to use a builder that was already finalized or abandoned.
    AlreadyClosed,

    /// Variant for keys that were added out of order.
    OutOfOrder,

    /// Variant for a block that could not be compressed.
    Compression(String),

    /// Variant for a footer that could not be serialized.
    FooterSerialization(ReadError),

    /// Variant for IO errors.
    IO(DBIOError),
}

impl std::error::Error for BuilderError {}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::AlreadyClosed => write!(
                f,
                "Attempted to perform an operation when the file had already been closed."
            ),
            BuilderError::OutOfOrder => write!(
                f,
                "Attempted to add a key but it was out of order. Keys must be added in sorted \
                order."
            ),
            BuilderError::Compression(reason) => {
                write!(f, "Failed to compress a block. {}", reason)
            }
            BuilderError::FooterSerialization(base_err) => write!(f, "{}", base_err),
            BuilderError::IO(base_err) => write!(f, "{}", base_err),
        }
    }
}

impl From<io::Error> for BuilderError {
    fn from(err: io::Error) -> Self {
        BuilderError::IO(err.into())
    }
}
