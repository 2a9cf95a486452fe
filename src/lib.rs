/*!
MistDB is an embeddable, persistent and ordered key-value store built on a log-structured merge
tree.

Writes are appended to a write-ahead log and applied to an in-memory memtable. Full memtables are
flushed to immutable, sorted table files that a background thread merges into progressively larger
levels. Reads consult the memtables first and then the table files from newest to oldest.

```no_run
use mistdb::{DbOptions, DB};

let options = DbOptions {
    db_path: "/tmp/mistdb".to_string(),
    create_if_missing: true,
    ..DbOptions::default()
};
let db = DB::open(options)?;
db.put(b"batmann", b"robin")?;
assert_eq!(db.get(b"batmann")?, Some(b"robin".to_vec()));
db.close()?;
# Ok::<(), mistdb::MistDBError>(())
```
*/

#![warn(missing_debug_implementations, missing_docs)]

pub mod db;
pub use db::{DatabaseIterator, DB};

pub mod fs;

mod compaction;
mod file_names;
mod iterator;
mod logs;
mod memtable;
mod table_cache;
mod tables;
mod utils;
mod versioning;
mod write_ahead_log;

mod config;
pub use config::TableFileCompressionType;

mod entry;
pub use entry::{decode_entry, encode_entry, Entry};

mod errors;
pub use errors::{MistDBError, MistDBResult};

mod key;
pub use key::Operation;

pub mod options;
pub use options::DbOptions;

pub use utils::comparator::compare;
