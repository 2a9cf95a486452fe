/*!
This module contains utilities for managing file names used by the database.

Files are rooted at the `db_path` as provided in the [database instantiation options](crate::DbOptions).

Files (and their name formats) used by the database are as follows:

- Database lock file: `./LOCK`
- Write-ahead logs: `./wal/wal-[0-9]+.log`
- Table files: `./data/[0-9]+.rdb`
- Quarantined table files: `./data/[0-9]+.rdb.corrupt`
- Manifest files: `./MANIFEST-[0-9]+.manifest`
- CURRENT manifest pointer file: `CURRENT`
- Temp files: `[0-9]+.dbtemp`
*/

use std::path::{Path, PathBuf};

/// The name of the database lock file.
pub(crate) const LOCK_FILE: &str = "LOCK";

/// The directory name that write-ahead logs will be stored in.
pub(crate) const WAL_DIR: &str = "wal";

/// Suffix for write-ahead log files.
pub(crate) const WAL_EXT: &str = "log";

/// The directory name that data files will be stored in.
pub(crate) const DATA_DIR: &str = "data";

/// Suffix for table files.
pub(crate) const TABLE_EXT: &str = "rdb";

/// Suffix appended to table files that failed validation.
pub(crate) const CORRUPT_EXT: &str = "corrupt";

/// The manifest file extension.
pub(crate) const MANIFEST_FILE_EXT: &str = "manifest";

/// Name of the *CURRENT* file.
pub(crate) const CURRENT_FILE_NAME: &str = "CURRENT";

/// The temp file extension.
pub(crate) const TEMP_FILE_EXT: &str = "dbtemp";

/// The kinds of files that are recognized in a database directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ParsedFileType {
    /// A write-ahead log with its number.
    WriteAheadLog(u64),
    /// A table file with its number.
    TableFile(u64),
    /// A manifest file with its number.
    ManifestFile(u64),
    /// A temporary file with its number.
    TempFile(u64),
    /// The CURRENT file.
    CurrentFile,
    /// The database lock file.
    DBLockFile,
}

/// Various utilities for managing file and folder names that MistDB uses.
#[derive(Clone, Debug)]
pub(crate) struct FileNameHandler {
    db_path: PathBuf,
}

/// Crate-only methods
impl FileNameHandler {
    /// Create a new instance of the [`FileNameHandler`].
    pub(crate) fn new<P: AsRef<Path>>(db_path: P) -> Self {
        FileNameHandler {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Get the root directory of the database.
    pub(crate) fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the directory holding the write-ahead logs.
    pub(crate) fn get_wal_dir(&self) -> PathBuf {
        self.db_path.join(WAL_DIR)
    }

    /// Get the directory holding the table files.
    pub(crate) fn get_data_dir(&self) -> PathBuf {
        self.db_path.join(DATA_DIR)
    }

    /// Resolve the path to the write-ahead log.
    pub(crate) fn get_wal_file_path(&self, wal_number: u64) -> PathBuf {
        self.get_wal_dir()
            .join(format!("wal-{number}.{WAL_EXT}", number = wal_number))
    }

    /// Resolve the path to a specific table file.
    pub(crate) fn get_table_file_path(&self, file_number: u64) -> PathBuf {
        self.get_data_dir()
            .join(format!("{number}.{TABLE_EXT}", number = file_number))
    }

    /// Resolve the path that a table file is moved to when it fails validation.
    pub(crate) fn get_corrupt_table_file_path(&self, file_number: u64) -> PathBuf {
        self.get_data_dir().join(format!(
            "{number}.{TABLE_EXT}.{CORRUPT_EXT}",
            number = file_number
        ))
    }

    /**
    Resolve the path to the manifest file.
    */
    pub(crate) fn get_manifest_file_path(&self, manifest_number: u64) -> PathBuf {
        self.db_path.join(Self::get_manifest_file_name(manifest_number))
    }

    /// Get the bare file name of a manifest file. This is what the CURRENT file records.
    pub(crate) fn get_manifest_file_name(manifest_number: u64) -> String {
        format!(
            "MANIFEST-{number}.{MANIFEST_FILE_EXT}",
            number = manifest_number
        )
    }

    /// Resolve the path to the CURRENT file.
    pub(crate) fn get_current_file_path(&self) -> PathBuf {
        self.db_path.join(CURRENT_FILE_NAME)
    }

    /// Resolve the path to the database lock file.
    pub(crate) fn get_lock_file_path(&self) -> PathBuf {
        self.db_path.join(LOCK_FILE)
    }

    /// Resolve the path to a temporary file.
    pub(crate) fn get_temp_file_path(&self, file_number: u64) -> PathBuf {
        self.db_path
            .join(format!("{number}.{TEMP_FILE_EXT}", number = file_number))
    }

    /**
    Determine the type of a file from its name.

    Returns `None` for names that the database does not produce. Quarantined tables are not
    recognized so that they are never cleaned up automatically.
    */
    pub(crate) fn parse_file_name(path: &Path) -> Option<ParsedFileType> {
        let file_name = path.file_name()?.to_str()?;

        if file_name == CURRENT_FILE_NAME {
            return Some(ParsedFileType::CurrentFile);
        }

        if file_name == LOCK_FILE {
            return Some(ParsedFileType::DBLockFile);
        }

        if let Some(rest) = file_name.strip_prefix("MANIFEST-") {
            let number = rest.strip_suffix(&format!(".{MANIFEST_FILE_EXT}"))?;
            return number.parse().ok().map(ParsedFileType::ManifestFile);
        }

        if let Some(rest) = file_name.strip_prefix("wal-") {
            let number = rest.strip_suffix(&format!(".{WAL_EXT}"))?;
            return number.parse().ok().map(ParsedFileType::WriteAheadLog);
        }

        if let Some(number) = file_name.strip_suffix(&format!(".{TABLE_EXT}")) {
            return number.parse().ok().map(ParsedFileType::TableFile);
        }

        if let Some(number) = file_name.strip_suffix(&format!(".{TEMP_FILE_EXT}")) {
            return number.parse().ok().map(ParsedFileType::TempFile);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn file_paths_are_rooted_at_the_database_directory() {
        let handler = FileNameHandler::new("/tmp/mist");

        assert_eq!(
            handler.get_wal_file_path(3),
            PathBuf::from("/tmp/mist/wal/wal-3.log")
        );
        assert_eq!(
            handler.get_table_file_path(12),
            PathBuf::from("/tmp/mist/data/12.rdb")
        );
        assert_eq!(
            handler.get_corrupt_table_file_path(12),
            PathBuf::from("/tmp/mist/data/12.rdb.corrupt")
        );
        assert_eq!(
            handler.get_manifest_file_path(1),
            PathBuf::from("/tmp/mist/MANIFEST-1.manifest")
        );
        assert_eq!(
            handler.get_current_file_path(),
            PathBuf::from("/tmp/mist/CURRENT")
        );
        assert_eq!(
            handler.get_temp_file_path(8),
            PathBuf::from("/tmp/mist/8.dbtemp")
        );
    }

    #[test]
    fn generated_file_names_can_be_parsed_back_to_their_type() {
        let handler = FileNameHandler::new("db");

        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_wal_file_path(4)),
            Some(ParsedFileType::WriteAheadLog(4))
        );
        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_table_file_path(5)),
            Some(ParsedFileType::TableFile(5))
        );
        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_manifest_file_path(6)),
            Some(ParsedFileType::ManifestFile(6))
        );
        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_temp_file_path(7)),
            Some(ParsedFileType::TempFile(7))
        );
        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_current_file_path()),
            Some(ParsedFileType::CurrentFile)
        );
        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_lock_file_path()),
            Some(ParsedFileType::DBLockFile)
        );
    }

    #[test]
    fn unknown_and_quarantined_file_names_are_not_recognized() {
        let handler = FileNameHandler::new("db");

        assert_eq!(
            FileNameHandler::parse_file_name(&handler.get_corrupt_table_file_path(5)),
            None
        );
        assert_eq!(FileNameHandler::parse_file_name(Path::new("db/notes.txt")), None);
        assert_eq!(FileNameHandler::parse_file_name(Path::new("db/x.rdb")), None);
    }
}
