/*!
This module holds the option structure that is passed to MistDB when opening a database.
*/

use std::fmt;
use std::sync::Arc;

use crate::config::TableFileCompressionType;
use crate::fs::{FileSystem, OsFileSystem};

/**
Holds options to control database behavior.

Every field has a default suitable for small embedded workloads.

# Example

```no_run
use mistdb::DbOptions;

let options = DbOptions {
    db_path: "/tmp/mistdb".to_string(),
    create_if_missing: true,
    ..DbOptions::default()
};
```
*/
#[derive(Clone)]
pub struct DbOptions {
    /**
    The path of the directory to use for the database's operations.

    **This defaults to the current working directory.**
    */
    pub db_path: String,

    /**
    Create the database if it does not already exist at `db_path`.

    **This defaults to `false`.**
    */
    pub create_if_missing: bool,

    /**
    Fail to open if a database already exists at `db_path`.

    **This defaults to `false`.**
    */
    pub error_if_exists: bool,

    /**
    The maximum size that the memtable can reach before it is flushed to disk.

    Up to two memtables can reside in memory at a time, one actively serving reads and writes
    and a second one in the process of being flushed to disk.

    **This defaults to 4 MiB.**
    */
    pub write_buffer_size: usize,

    /**
    This amount of bytes will be written to a file before switching to a new one.

    Most clients should leave this parameter alone. However if your filesystem is more efficient
    with larger files, you could consider increasing the value. The downside will be longer
    compactions and hence longer latency/performance hiccups. Another reason to increase this
    parameter might be when you are initially populating a large database.

    **This defaults to 2 MiB.**
    */
    pub max_file_size: usize,

    /**
    The approximate size of uncompressed data packed into a table data block.

    **This defaults to 4 KiB.**
    */
    pub max_block_size: usize,

    /**
    The compression applied to table data blocks.

    **This defaults to [`TableFileCompressionType::Snappy`].**
    */
    pub compression: TableFileCompressionType,

    /**
    The largest key accepted by `put` and `delete`.

    **This defaults to 64 KiB.**
    */
    pub max_key_size: usize,

    /**
    The largest value accepted by `put`.

    **This defaults to 64 MiB.**
    */
    pub max_value_size: usize,

    /**
    Flush the memtable to a table file when the database is closed.

    When disabled, unflushed writes are recovered from the write-ahead log on the next open.

    **This defaults to `true`.**
    */
    pub flush_on_close: bool,

    /**
    The maximum number of open table files kept in the table cache.

    **This defaults to 1000.**
    */
    pub table_cache_capacity: usize,

    /**
    A wrapper around a particular file system to use.

    **This defaults to [`OsFileSystem`](crate::fs::OsFileSystem).**
    */
    pub filesystem_provider: Arc<dyn FileSystem>,
}

/// Public methods
impl DbOptions {
    /// Get the database path.
    pub fn db_path(&self) -> &str {
        self.db_path.as_str()
    }

    /// Get a strong reference to the file system provider.
    pub fn filesystem_provider(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.filesystem_provider)
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        let db_path = std::env::current_dir()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ".".to_string());

        DbOptions {
            db_path,
            create_if_missing: false,
            error_if_exists: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_file_size: 2 * 1024 * 1024,
            max_block_size: 4 * 1024,
            compression: TableFileCompressionType::Snappy,
            max_key_size: 64 * 1024,
            max_value_size: 64 * 1024 * 1024,
            flush_on_close: true,
            table_cache_capacity: 1000,
            filesystem_provider: Arc::new(OsFileSystem::new()),
        }
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("db_path", &self.db_path)
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_file_size", &self.max_file_size)
            .field("max_block_size", &self.max_block_size)
            .field("compression", &self.compression)
            .field("flush_on_close", &self.flush_on_close)
            .field("filesystem_provider", &self.filesystem_provider.name())
            .finish()
    }
}
