/*!
This module provides a thread-safe table cache.
*/

use std::fmt;
use std::sync::Arc;

use crate::entry::Entry;
use crate::errors::{table_read_error, MistDBResult};
use crate::file_names::FileNameHandler;
use crate::fs::FileSystem;
use crate::key::InternalKey;
use crate::tables::Table;
use crate::utils::cache::{Cache, LRUCache};
use crate::DbOptions;

type FileNumber = u64;

/// A thread-safe cache of opened table files.
pub(crate) struct TableCache {
    /// The underlying cache storing the tables.
    cache: Box<dyn Cache<FileNumber, Table>>,

    /// Utility for getting file names used by the database.
    file_name_handler: FileNameHandler,

    /// A reference to the file system provider in use by the database.
    filesystem_provider: Arc<dyn FileSystem>,
}

/// Crate-only methods
impl TableCache {
    /// Create a new instance of a [`TableCache`].
    pub(crate) fn new(options: &DbOptions) -> Self {
        let cache = Box::new(LRUCache::<FileNumber, Table>::new(
            options.table_cache_capacity,
        ));

        Self {
            cache,
            file_name_handler: FileNameHandler::new(options.db_path()),
            filesystem_provider: options.filesystem_provider(),
        }
    }

    /**
    Get the newest entry visible at the sequence number of `key` from the specified table file.

    `key` is a seek key. A tombstone is returned as an [`Entry`] without a value.
    */
    pub(crate) fn get(&self, file_number: u64, key: &InternalKey) -> MistDBResult<Option<Entry>> {
        let table = self.find_table(file_number)?;

        table
            .get(key)
            .map_err(|read_err| table_read_error(file_number, read_err))
    }

    /// Remove the cached table for the given file number.
    pub(crate) fn remove(&self, file_number: u64) {
        self.cache.remove(&file_number);
    }

    /**
    Get a handle to an opened table, opening the file if it is not already cached.

    Tables that fail to open are not cached.
    */
    pub(crate) fn find_table(&self, file_number: u64) -> MistDBResult<Arc<Table>> {
        if let Some(cached_table) = self.cache.get(&file_number) {
            return Ok(cached_table);
        }

        // Table file was not found in the cache so read from disk
        let table_path = self.file_name_handler.get_table_file_path(file_number);
        let table_file = self.filesystem_provider.open_file(&table_path)?;
        let table = Table::open(file_number, table_file)
            .map_err(|read_err| table_read_error(file_number, read_err))?;
        log::debug!(
            "Opened table file {} holding {} entries.",
            table.file_number(),
            table.num_entries()
        );

        Ok(self.cache.insert(file_number, table))
    }
}

impl fmt::Debug for TableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCache")
            .field("num_cached_tables", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::errors::MistDBError;
    use crate::fs::OsFileSystem;
    use crate::key::Operation;
    use crate::tables::TableBuilder;

    use super::*;

    fn setup() -> (tempfile::TempDir, DbOptions) {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::max())
            .is_test(true)
            .try_init();

        let temp_dir = tempfile::tempdir().unwrap();
        let options = DbOptions {
            db_path: temp_dir.path().to_str().unwrap().to_string(),
            table_cache_capacity: 2,
            filesystem_provider: Arc::new(OsFileSystem::new()),
            ..DbOptions::default()
        };
        let file_name_handler = FileNameHandler::new(options.db_path());
        options
            .filesystem_provider()
            .create_dir_all(&file_name_handler.get_data_dir())
            .unwrap();

        (temp_dir, options)
    }

    fn write_table(options: &DbOptions, file_number: u64, user_key: &[u8]) {
        let path = FileNameHandler::new(options.db_path()).get_table_file_path(file_number);
        let mut builder =
            TableBuilder::new(options, options.filesystem_provider(), path, file_number).unwrap();
        builder
            .add_entry(
                &InternalKey::new(user_key.to_vec(), file_number, Operation::Put),
                b"value",
            )
            .unwrap();
        builder.finalize().unwrap();
    }

    #[test]
    fn tables_are_opened_once_and_served_from_the_cache() {
        let (_temp_dir, options) = setup();
        write_table(&options, 1, b"a");
        let table_cache = TableCache::new(&options);

        let first_handle = table_cache.find_table(1).unwrap();
        let second_handle = table_cache.find_table(1).unwrap();
        assert!(Arc::ptr_eq(&first_handle, &second_handle));

        let found = table_cache
            .get(1, &InternalKey::new_for_seeking(b"a".to_vec(), 10))
            .unwrap()
            .unwrap();
        assert_eq!(found.value(), Some(&b"value"[..]));

        table_cache.remove(1);
        let third_handle = table_cache.find_table(1).unwrap();
        assert!(!Arc::ptr_eq(&first_handle, &third_handle));
    }

    #[test]
    fn missing_and_corrupt_tables_surface_errors() {
        let (_temp_dir, options) = setup();
        let table_cache = TableCache::new(&options);
        assert!(matches!(table_cache.find_table(5), Err(MistDBError::IO(_))));

        write_table(&options, 6, b"b");
        let path = FileNameHandler::new(options.db_path()).get_table_file_path(6);
        let mut raw_table = std::fs::read(&path).unwrap();
        raw_table[0] ^= 0xff;
        std::fs::write(&path, &raw_table).unwrap();

        match table_cache.find_table(6) {
            Err(MistDBError::CorruptBlock(metadata)) => assert_eq!(metadata.file_number, 6),
            other => panic!("Expected a corrupt block error but got {:?}", other),
        }
    }
}
