/*!
This module contains error types specific to version operations as well as wrappers and `From`
implementations for common errors to enable error propagation.
*/

use std::{fmt, io};

use crate::errors::{DBIOError, LogIOError};

/// Alias for a [`Result`] that wraps a [`WriteError`].
pub type WriteResult<T> = Result<T, WriteError>;

/// Errors that can result from persisting version changes to disk.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteError {
    /// Variant for IO errors encountered while writing the `CURRENT` file.
    IO(DBIOError),

    /// Variant for errors encountered while writing to the manifest file.
    Log(LogIOError),
}

impl std::error::Error for WriteError {}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::IO(base_err) => write!(f, "{}", base_err),
            WriteError::Log(base_err) => {
                write!(f, "Failed to write to the manifest file. {}", base_err)
            }
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::IO(err.into())
    }
}

impl From<LogIOError> for WriteError {
    fn from(err: LogIOError) -> Self {
        WriteError::Log(err)
    }
}
