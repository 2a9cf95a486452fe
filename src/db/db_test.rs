use pretty_assertions::assert_eq;
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs::OpenOptions;

use super::test_utils::*;
use super::*;

fn setup() {
    let _ = env_logger::builder()
        // Include all events in tests
        .filter_level(log::LevelFilter::max())
        // Ensure events are captured by `cargo test`
        .is_test(true)
        // Ignore errors initializing the logger if tests race to configure it
        .try_init();
}

#[test]
fn opening_a_new_database_with_create_if_missing_true_succeeds() {
    setup();

    let (_temp_dir, options) = new_test_options();

    let maybe_db = DB::open(options);

    assert!(
        maybe_db.is_ok(),
        "Expected to open the database but got an error: {:?}",
        maybe_db.err()
    );
}

#[test]
fn opening_non_existent_database_with_create_if_missing_false_fails() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.create_if_missing = false;

    assert!(matches!(DB::open(options), Err(MistDBError::Open(_))));
}

#[test]
fn opening_an_existing_database_with_error_if_exists_fails() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options.clone()).unwrap();
    db.close().unwrap();

    let mut strict_options = options.clone();
    strict_options.error_if_exists = true;
    assert!(matches!(DB::open(strict_options), Err(MistDBError::Open(_))));

    // The database is untouched by the failed open
    assert!(DB::open(options).is_ok());
}

#[test]
fn a_database_can_only_be_opened_once_at_a_time() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options.clone()).unwrap();

    assert!(matches!(DB::open(options.clone()), Err(MistDBError::Open(_))));

    db.close().unwrap();
    assert!(DB::open(options).is_ok());
}

#[test]
fn can_write_to_and_read_from_the_database() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    db.put(b"batmann", b"lab").unwrap();
    assert_eq!(db.get(b"batmann").unwrap(), Some(b"lab".to_vec()));
    assert_eq!(db.get(b"Does not exist").unwrap(), None);

    db.put(b"batmann", b"corgi").unwrap();
    assert_eq!(db.get(b"batmann").unwrap(), Some(b"corgi".to_vec()));

    db.put(b"", b"empty key").unwrap();
    db.put(b"empty value", b"").unwrap();
    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(b"empty value").unwrap(), Some(vec![]));
}

#[test]
fn deleted_keys_are_absent_even_when_older_tables_hold_values() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options.clone()).unwrap();

    db.put(b"robin", b"v1").unwrap();
    db.force_memtable_compaction().unwrap();
    assert_eq!(total_table_files(&db), 1);

    db.delete(b"robin").unwrap();
    assert_eq!(db.get(b"robin").unwrap(), None);

    db.force_memtable_compaction().unwrap();
    assert_eq!(db.get(b"robin").unwrap(), None);

    // Deleting a key that never existed is not an error
    db.delete(b"never written").unwrap();

    db.close().unwrap();
    let db = DB::open(options).unwrap();
    assert_eq!(db.get(b"robin").unwrap(), None);
}

#[test]
fn iterator_yields_keys_in_order() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    db.put(b"0", b"zero").unwrap();
    db.put(b"1", b"one").unwrap();
    db.put(b"2", b"two").unwrap();

    let mut iter = db.new_iterator().unwrap();
    iter.seek_to_first().unwrap();
    assert_db_iterator_current_key_value(&iter, b"0", b"zero");

    assert_eq!(iter.next(), Some((&b"1"[..], &b"one"[..])));
    assert_eq!(iter.next(), Some((&b"2"[..], &b"two"[..])));
    assert_eq!(iter.next(), None);
    assert!(!iter.is_valid());
    assert!(iter.status().is_ok());
}

#[test]
fn iterator_merges_memtables_and_table_files() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    db.put(b"d", b"table-d").unwrap();
    db.put(b"b", b"table-b").unwrap();
    db.put(b"f", b"table-f").unwrap();
    db.force_memtable_compaction().unwrap();

    db.put(b"b", b"memtable-b").unwrap();
    db.put(b"a", b"memtable-a").unwrap();
    db.delete(b"f").unwrap();
    db.put(b"e", b"memtable-e").unwrap();

    assert_eq!(
        collect_all(&db),
        vec![
            (b"a".to_vec(), b"memtable-a".to_vec()),
            (b"b".to_vec(), b"memtable-b".to_vec()),
            (b"d".to_vec(), b"table-d".to_vec()),
            (b"e".to_vec(), b"memtable-e".to_vec()),
        ]
    );

    let mut iter = db.new_iterator().unwrap();
    iter.seek(b"c").unwrap();
    assert_db_iterator_current_key_value(&iter, b"d", b"table-d");

    iter.seek_to_last().unwrap();
    assert_db_iterator_current_key_value(&iter, b"e", b"memtable-e");
    assert_eq!(iter.prev(), Some((&b"d"[..], &b"table-d"[..])));
    assert_eq!(iter.prev(), Some((&b"b"[..], &b"memtable-b"[..])));
    assert_eq!(iter.next(), Some((&b"d"[..], &b"table-d"[..])));
    assert_eq!(iter.prev(), Some((&b"b"[..], &b"memtable-b"[..])));
    assert_eq!(iter.prev(), Some((&b"a"[..], &b"memtable-a"[..])));
    assert_eq!(iter.prev(), None);

    iter.seek(b"zzz").unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn iterator_does_not_observe_later_writes_flushes_or_compactions() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    db.put(b"a", b"1").unwrap();
    db.put(b"c", b"3").unwrap();
    db.force_memtable_compaction().unwrap();

    let mut iter = db.new_iterator().unwrap();

    db.put(b"b", b"2").unwrap();
    db.put(b"a", b"overwritten").unwrap();
    db.delete(b"c").unwrap();
    db.compact_range(None, None).unwrap();

    iter.seek_to_first().unwrap();
    assert_db_iterator_current_key_value(&iter, b"a", b"1");
    assert_eq!(iter.next(), Some((&b"c"[..], &b"3"[..])));
    assert_eq!(iter.next(), None);
    iter.close();

    assert_eq!(
        collect_all(&db),
        vec![
            (b"a".to_vec(), b"overwritten".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]
    );
}

#[test]
fn readers_never_miss_a_key_while_it_is_overwritten_flushed_and_compacted() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    setup();

    let (_temp_dir, options) = new_test_options();
    let db = Arc::new(DB::open(options).unwrap());
    db.put(b"stable", b"0").unwrap();

    let stop_readers = Arc::new(AtomicBool::new(false));
    let readers: Vec<thread::JoinHandle<()>> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            let stop_readers = Arc::clone(&stop_readers);
            thread::spawn(move || {
                while !stop_readers.load(Ordering::Acquire) {
                    assert!(db.get(b"stable").unwrap().is_some());

                    let mut iter = db.new_iterator().unwrap();
                    iter.seek(b"stable").unwrap();
                    assert_eq!(iter.key(), Some(&b"stable"[..]));
                }
            })
        })
        .collect();

    for round in 1..=200 {
        db.put(b"stable", round.to_string().as_bytes()).unwrap();
        if round % 20 == 0 {
            db.compact_range(None, None).unwrap();
        } else if round % 5 == 0 {
            db.force_memtable_compaction().unwrap();
        }
    }

    stop_readers.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.get(b"stable").unwrap(), Some(b"200".to_vec()));
}

#[test]
fn operations_after_close_fail_with_closed() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();
    db.put(b"a", b"1").unwrap();
    let mut iter = db.new_iterator().unwrap();

    db.close().unwrap();
    // Closing again is a no-op
    db.close().unwrap();

    assert_eq!(db.put(b"a", b"2"), Err(MistDBError::Closed));
    assert_eq!(db.delete(b"a"), Err(MistDBError::Closed));
    assert_eq!(db.get(b"a"), Err(MistDBError::Closed));
    assert!(matches!(db.new_iterator(), Err(MistDBError::Closed)));
    assert_eq!(db.force_memtable_compaction(), Err(MistDBError::Closed));
    assert_eq!(iter.seek_to_first(), Err(MistDBError::Closed));
    assert_eq!(iter.next(), None);
}

#[test]
fn closed_iterators_cannot_be_used() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();
    db.put(b"a", b"1").unwrap();

    let mut iter = db.new_iterator().unwrap();
    iter.seek_to_first().unwrap();
    assert!(iter.is_valid());

    iter.close();
    assert!(!iter.is_valid());
    assert_eq!(iter.seek(b"a"), Err(MistDBError::Closed));
    assert_eq!(iter.key(), None);
}

#[test]
fn oversized_keys_and_values_are_rejected() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.max_key_size = 8;
    options.max_value_size = 16;
    let db = DB::open(options).unwrap();

    assert!(matches!(
        db.put(&[b'k'; 9], b"v"),
        Err(MistDBError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.put(b"k", &[b'v'; 17]),
        Err(MistDBError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.delete(&[b'k'; 9]),
        Err(MistDBError::InvalidArgument(_))
    ));

    db.put(&[b'k'; 8], &[b'v'; 16]).unwrap();
    assert_eq!(db.get(&[b'k'; 8]).unwrap(), Some(vec![b'v'; 16]));
}

#[test]
fn unflushed_writes_are_recovered_from_the_write_ahead_log() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.flush_on_close = false;

    let db = DB::open(options.clone()).unwrap();
    for idx in 0..100 {
        db.put(
            format!("key-{:04}", idx).as_bytes(),
            format!("value-{}", idx).as_bytes(),
        )
        .unwrap();
    }
    db.delete(b"key-0050").unwrap();
    db.close().unwrap();
    drop(db);

    let db = DB::open(options.clone()).unwrap();
    for idx in 0..100 {
        let expected = if idx == 50 {
            None
        } else {
            Some(format!("value-{}", idx).into_bytes())
        };
        assert_eq!(db.get(format!("key-{:04}", idx).as_bytes()).unwrap(), expected);
    }

    // New writes continue after the recovered sequence numbers
    db.put(b"key-0000", b"newest").unwrap();
    db.close().unwrap();
    drop(db);

    let db = DB::open(options).unwrap();
    assert_eq!(db.get(b"key-0000").unwrap(), Some(b"newest".to_vec()));
    assert_eq!(db.get(b"key-0099").unwrap(), Some(b"value-99".to_vec()));
}

#[test]
fn a_torn_write_ahead_log_tail_drops_only_the_last_write() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.flush_on_close = false;

    let db = DB::open(options.clone()).unwrap();
    for idx in 0..10 {
        db.put(format!("key-{}", idx).as_bytes(), b"value").unwrap();
    }
    db.close().unwrap();
    drop(db);

    // Cut the last record short to simulate a crash in the middle of an append
    let file_name_handler = FileNameHandler::new(options.db_path());
    let newest_wal_path = std::fs::read_dir(file_name_handler.get_wal_dir())
        .unwrap()
        .map(|dir_entry| dir_entry.unwrap().path())
        .filter(|path| {
            matches!(
                FileNameHandler::parse_file_name(path),
                Some(ParsedFileType::WriteAheadLog(_))
            )
        })
        .max_by_key(|path| match FileNameHandler::parse_file_name(path) {
            Some(ParsedFileType::WriteAheadLog(wal_number)) => wal_number,
            _ => 0,
        })
        .unwrap();
    let wal_file = OpenOptions::new()
        .write(true)
        .open(&newest_wal_path)
        .unwrap();
    let wal_length = wal_file.metadata().unwrap().len();
    wal_file.set_len(wal_length - 3).unwrap();
    drop(wal_file);

    let db = DB::open(options).unwrap();
    for idx in 0..9 {
        assert_eq!(
            db.get(format!("key-{}", idx).as_bytes()).unwrap(),
            Some(b"value".to_vec())
        );
    }
    assert_eq!(db.get(b"key-9").unwrap(), None);
}

#[test]
fn flushed_data_survives_a_reopen() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options.clone()).unwrap();
    db.put(b"flushed", b"on close").unwrap();
    db.close().unwrap();
    drop(db);

    let db = DB::open(options).unwrap();
    assert_eq!(total_table_files(&db), 1);
    assert_eq!(db.get(b"flushed").unwrap(), Some(b"on close".to_vec()));
}

#[test]
fn corrupt_table_files_are_quarantined_at_open() {
    setup();

    let (temp_dir, options) = new_test_options();
    let db = DB::open(options.clone()).unwrap();
    db.put(b"doomed", b"value").unwrap();
    db.close().unwrap();
    drop(db);

    let data_dir = temp_dir.path().join("data");
    let table_path = std::fs::read_dir(&data_dir)
        .unwrap()
        .map(|dir_entry| dir_entry.unwrap().path())
        .find(|path| path.extension().map_or(false, |ext| ext == "rdb"))
        .unwrap();
    let mut table_bytes = std::fs::read(&table_path).unwrap();
    table_bytes[0] ^= 0xff;
    std::fs::write(&table_path, table_bytes).unwrap();

    let db = DB::open(options).unwrap();
    assert_eq!(total_table_files(&db), 0);
    assert_eq!(db.get(b"doomed").unwrap(), None);
    assert!(!table_path.exists());

    let mut quarantined_name = table_path.file_name().unwrap().to_os_string();
    quarantined_name.push(".corrupt");
    assert!(data_dir.join(quarantined_name).exists());
}

#[test]
fn a_table_found_corrupt_by_a_read_is_quarantined() {
    setup();

    let (temp_dir, mut options) = new_test_options();
    options.table_cache_capacity = 1;
    let db = DB::open(options).unwrap();
    let data_dir = temp_dir.path().join("data");

    db.put(b"a", b"first table").unwrap();
    db.force_memtable_compaction().unwrap();
    let table_paths: Vec<std::path::PathBuf> = std::fs::read_dir(&data_dir)
        .unwrap()
        .map(|dir_entry| dir_entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "rdb"))
        .collect();
    assert_eq!(table_paths.len(), 1);
    let corrupt_table_path = table_paths[0].clone();
    let corrupt_file_number: u64 = corrupt_table_path
        .file_stem()
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    db.put(b"z", b"second table").unwrap();
    db.force_memtable_compaction().unwrap();
    assert_eq!(total_table_files(&db), 2);
    // Reading the second table pushes the first one out of the table cache
    assert_eq!(db.get(b"z").unwrap(), Some(b"second table".to_vec()));

    let mut table_bytes = std::fs::read(&corrupt_table_path).unwrap();
    table_bytes[0] ^= 0xff;
    std::fs::write(&corrupt_table_path, table_bytes).unwrap();

    match db.get(b"a") {
        Err(MistDBError::CorruptBlock(corruption)) => {
            assert_eq!(corruption.file_number, corrupt_file_number)
        }
        other => panic!("Expected a corrupt block error but got {:?}", other),
    }
    assert_eq!(total_table_files(&db), 1);
    assert!(!corrupt_table_path.exists());
    assert!(data_dir
        .join(format!("{}.rdb.corrupt", corrupt_file_number))
        .exists());

    // The quarantined table is no longer consulted
    assert_eq!(db.get(b"a").unwrap(), None);
    assert_eq!(db.get(b"z").unwrap(), Some(b"second table".to_vec()));
}

#[test]
fn removing_an_unused_compaction_output_tolerates_missing_files() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();
    let output_path = db.db_state.file_name_handler.get_table_file_path(999);
    std::fs::write(&output_path, b"unfinished").unwrap();

    crate::compaction::worker::remove_output_file(&db.db_state, 999);
    assert!(!output_path.exists());

    // The file is already gone so the removal fails and is only logged
    crate::compaction::worker::remove_output_file(&db.db_state, 999);
    assert!(!output_path.exists());
    db.put(b"still", b"writable").unwrap();
    assert_eq!(db.get(b"still").unwrap(), Some(b"writable".to_vec()));
}

#[test]
fn filling_the_write_buffer_flushes_the_memtable_in_the_background() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.write_buffer_size = 16 * 1024;
    let db = DB::open(options).unwrap();

    let value = vec![b'x'; 1000];
    for idx in 0..200 {
        db.put(format!("key-{:04}", idx).as_bytes(), &value).unwrap();
    }
    db.force_memtable_compaction().unwrap();

    assert!(total_table_files(&db) > 0);
    for idx in 0..200 {
        assert_eq!(
            db.get(format!("key-{:04}", idx).as_bytes()).unwrap(),
            Some(value.clone())
        );
    }
}

#[test]
fn compact_range_pushes_files_out_of_level_zero() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    make_tables(&db, 3, b"a", b"z");
    // Flushes that overlap nothing are placed below level 0
    assert_eq!(files_per_level(&db), "1,1,1,0,0,0,0");

    db.compact_range(None, None).unwrap();

    assert_eq!(db.num_files_at_level(0), 0, "{}", files_per_level(&db));
    assert_eq!(total_table_files(&db), 1, "{}", files_per_level(&db));
    assert_eq!(db.get(b"a").unwrap(), Some(b"begin".to_vec()));
    assert_eq!(db.get(b"z").unwrap(), Some(b"end".to_vec()));
}

#[test]
fn compact_range_ignores_levels_without_overlapping_files() {
    setup();

    let (_temp_dir, options) = new_test_options();
    let db = DB::open(options).unwrap();

    make_tables(&db, 2, b"p", b"q");
    assert_eq!(files_per_level(&db), "0,1,1,0,0,0,0");

    // Neither range overlaps the files
    db.compact_range(None, Some(b"c")).unwrap();
    db.compact_range(Some(b"r"), None).unwrap();
    assert_eq!(files_per_level(&db), "0,1,1,0,0,0,0");

    db.compact_range(Some(b"p"), Some(b"q")).unwrap();
    assert_eq!(files_per_level(&db), "0,0,1,0,0,0,0");
    assert_eq!(db.get(b"p").unwrap(), Some(b"begin".to_vec()));
    assert_eq!(db.get(b"q").unwrap(), Some(b"end".to_vec()));
}

#[test]
fn random_writes_and_compactions_match_a_reference_map() {
    setup();

    let (_temp_dir, mut options) = new_test_options();
    options.write_buffer_size = 8 * 1024;
    options.max_file_size = 16 * 1024;
    let db = DB::open(options.clone()).unwrap();

    let mut rng = StdRng::seed_from_u64(301);
    let key_distribution = Uniform::new(0_u32, 500);
    let delete_distribution = Bernoulli::new(0.2).unwrap();
    let mut reference: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for round in 0..5 {
        for op_idx in 0..1000 {
            let key = format!("{:06}", key_distribution.sample(&mut rng)).into_bytes();
            if delete_distribution.sample(&mut rng) {
                db.delete(&key).unwrap();
                reference.remove(&key);
            } else {
                let value = format!("value-{}-{}", round, op_idx).repeat(4).into_bytes();
                db.put(&key, &value).unwrap();
                reference.insert(key, value);
            }
        }

        match round {
            1 => db.force_memtable_compaction().unwrap(),
            2 => db.compact_range(Some(b"000100"), Some(b"000300")).unwrap(),
            3 => db.compact_range(None, None).unwrap(),
            _ => {}
        }
    }

    let expected: Vec<(Vec<u8>, Vec<u8>)> = reference
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    assert_eq!(collect_all(&db), expected);
    for key_idx in 0..500_u32 {
        let key = format!("{:06}", key_idx).into_bytes();
        assert_eq!(db.get(&key).unwrap(), reference.get(&key).cloned());
    }

    db.close().unwrap();
    drop(db);

    let db = DB::open(options).unwrap();
    assert_eq!(collect_all(&db), expected);
}
