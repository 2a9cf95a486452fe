// Copyright (c) 2022 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::fmt;
use std::io;

use crate::errors::{DBIOError, MistDBError};

/// Type alias for [`Result`]'s with [`CompactionWorkerError`]'s.
pub(crate) type CompactionWorkerResult<T> = Result<T, CompactionWorkerError>;

/// Failures of the background compaction worker.
#[derive(Clone, Debug, PartialEq)]
pub enum CompactionWorkerError {
    /// The compaction thread could not be started.
    ThreadSpawn(DBIOError),

    /// A memtable could not be written to a table file.
    WriteTable(Box<MistDBError>),

    /// A version change could not be recorded in the manifest.
    ApplyVersionChange(Box<MistDBError>),

    /// The worker cannot continue in its current state, e.g. it was stopped or the database is
    /// shutting down.
    UnexpectedState(String),
}

impl std::error::Error for CompactionWorkerError {}

impl fmt::Display for CompactionWorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactionWorkerError::ThreadSpawn(base_err) => {
                write!(f, "Failed to start the compaction thread. {}", base_err)
            }
            CompactionWorkerError::WriteTable(base_err) => {
                write!(f, "Failed to write a table file. {}", base_err)
            }
            CompactionWorkerError::ApplyVersionChange(base_err) => {
                write!(f, "Failed to apply a version change. {}", base_err)
            }
            CompactionWorkerError::UnexpectedState(reason) => {
                write!(f, "Compaction halted. {}", reason)
            }
        }
    }
}

impl From<io::Error> for CompactionWorkerError {
    fn from(err: io::Error) -> Self {
        CompactionWorkerError::ThreadSpawn(err.into())
    }
}
