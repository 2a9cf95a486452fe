use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;

/// Create options for a new database in a fresh temporary directory.
pub(crate) fn new_test_options() -> (TempDir, DbOptions) {
    let temp_dir = tempfile::tempdir().unwrap();
    let options = DbOptions {
        db_path: temp_dir.path().to_str().unwrap().to_string(),
        create_if_missing: true,
        ..DbOptions::default()
    };

    (temp_dir, options)
}

/// Assert that the iterator's current key and value are the expected key and value.
pub(crate) fn assert_db_iterator_current_key_value(
    iter: &DatabaseIterator,
    expected_key: &[u8],
    expected_value: &[u8],
) {
    let (curr_key, curr_val) = iter.current().unwrap();
    assert_eq!(curr_key, expected_key);
    assert_eq!(curr_val, expected_value);
}

/// Get the total number of table files that make up the database.
pub(crate) fn total_table_files(db: &DB) -> usize {
    (0..MAX_NUM_LEVELS)
        .map(|level| db.num_files_at_level(level))
        .sum()
}

/**
Do `n` memtable compactions, each of which produces a table file covering the provided key range.
*/
pub(crate) fn make_tables(db: &DB, n: usize, start_user_key: &[u8], end_user_key: &[u8]) {
    for _ in 0..n {
        db.put(start_user_key, b"begin").unwrap();
        db.put(end_user_key, b"end").unwrap();
        db.force_memtable_compaction().unwrap();
    }
}

/// Return a comma separated list of the number of table files at each level.
pub(crate) fn files_per_level(db: &DB) -> String {
    let counts: Vec<String> = (0..MAX_NUM_LEVELS)
        .map(|level| db.num_files_at_level(level).to_string())
        .collect();

    counts.join(",")
}

/// Collect every key-value pair visible through a new iterator, in order.
pub(crate) fn collect_all(db: &DB) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.new_iterator().unwrap();
    iter.seek_to_first().unwrap();

    let mut pairs = vec![];
    while let Some((key, value)) = iter.current() {
        pairs.push((key.to_vec(), value.to_vec()));
        iter.next();
    }
    iter.status().unwrap();

    pairs
}
