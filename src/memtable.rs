/*!
The memtable is the in-memory, ordered buffer of the most recent writes to the database.

Every write is inserted with its own sequence number so older versions of a key are shadowed rather
than replaced. This keeps insertion cheap and lets readers holding an older snapshot sequence number
keep seeing the version that was current for them.
*/

use crossbeam_skiplist::SkipMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::entry::Entry;
use crate::errors::MistDBError;
use crate::iterator::{BoxedInternalIterator, MistDbIterator};
use crate::key::{InternalKey, Operation, MAX_SEQUENCE_NUMBER};

/// The approximate bookkeeping overhead of a single skip list node in bytes.
const NODE_OVERHEAD_BYTES: usize = 48;

/// An ordered, concurrent in-memory store of entries.
pub(crate) trait MemTable: Send + Sync {
    /// Returns the approximate memory usage of the memtable in bytes.
    fn approximate_memory_usage(&self) -> usize;

    /// Insert a new key-value pair into the memtable.
    fn insert(&self, key: InternalKey, value: Vec<u8>);

    /**
    Get the newest entry for `user_key` that is visible at `sequence_number`.

    Returns `None` if the `key` does not exist in the memtable. A tombstone is returned as an
    [`Entry`] without a value so that callers know to stop looking in older structures.
    */
    fn get(&self, user_key: &[u8], sequence_number: u64) -> Option<Entry>;

    /// Returns the number of records in the memtable, including shadowed ones.
    fn len(&self) -> usize;

    /// Returns true if the memtable has no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a cursor over every record of the memtable in internal key order.
    fn iter(&self) -> BoxedInternalIterator;

    /**
    Get the newest entry of every user key at or after `from`, in user key order.

    Shadowed versions are skipped. Tombstones are included.
    */
    fn scan(&self, from: &[u8]) -> MemTableScan;

    /// Record a new value for `user_key`.
    fn put(&self, user_key: Vec<u8>, value: Vec<u8>, sequence_number: u64) {
        self.insert(
            InternalKey::new(user_key, sequence_number, Operation::Put),
            value,
        );
    }

    /// Record a tombstone for `user_key`.
    fn delete(&self, user_key: Vec<u8>, sequence_number: u64) {
        self.insert(
            InternalKey::new(user_key, sequence_number, Operation::Delete),
            vec![],
        );
    }
}

/// A memtable backed by a lock-free skip list.
pub(crate) struct SkipListMemTable {
    /// The records of the memtable.
    store: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// The approximate number of bytes held by the records.
    approximate_size: AtomicUsize,
}

/// Crate-only methods
impl SkipListMemTable {
    /// Create an empty [`SkipListMemTable`].
    pub(crate) fn new() -> Self {
        Self {
            store: Arc::new(SkipMap::new()),
            approximate_size: AtomicUsize::new(0),
        }
    }
}

impl MemTable for SkipListMemTable {
    fn approximate_memory_usage(&self) -> usize {
        self.approximate_size.load(Ordering::Acquire)
    }

    fn insert(&self, key: InternalKey, value: Vec<u8>) {
        let record_size = key.get_user_key().len() + 9 + value.len() + NODE_OVERHEAD_BYTES;
        self.store.insert(key, value);
        self.approximate_size
            .fetch_add(record_size, Ordering::AcqRel);
    }

    fn get(&self, user_key: &[u8], sequence_number: u64) -> Option<Entry> {
        let lookup_key = InternalKey::new_for_seeking(user_key.to_vec(), sequence_number);
        let found = self.store.lower_bound(Bound::Included(&lookup_key))?;
        if found.key().get_user_key() != user_key {
            return None;
        }

        Some(Entry::from_internal_key(found.key(), found.value()))
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn iter(&self) -> BoxedInternalIterator {
        Box::new(MemTableIterator::new(Arc::clone(&self.store)))
    }

    fn scan(&self, from: &[u8]) -> MemTableScan {
        MemTableScan {
            store: Arc::clone(&self.store),
            next_lookup: Some(InternalKey::new_for_seeking(
                from.to_vec(),
                MAX_SEQUENCE_NUMBER,
            )),
        }
    }
}

impl fmt::Debug for SkipListMemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipListMemTable")
            .field("num_records", &self.store.len())
            .field("approximate_size", &self.approximate_memory_usage())
            .finish()
    }
}

/**
A cursor over the records of a memtable.

The cursor holds a copy of the record it is positioned at and relocates itself in the skip list on
every move. This keeps the cursor independent of the lifetime of skip list entries.
*/
pub(crate) struct MemTableIterator {
    /// The records being iterated.
    store: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// The record the cursor is positioned at.
    current: Option<(InternalKey, Vec<u8>)>,
}

/// Private methods
impl MemTableIterator {
    fn new(store: Arc<SkipMap<InternalKey, Vec<u8>>>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    fn position_at(&mut self, maybe_record: Option<(InternalKey, Vec<u8>)>) {
        self.current = maybe_record;
    }
}

impl MistDbIterator for MemTableIterator {
    type Key = InternalKey;
    type Error = MistDBError;

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek(&mut self, target: &InternalKey) -> Result<(), MistDBError> {
        let found = self
            .store
            .lower_bound(Bound::Included(target))
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        self.position_at(found);

        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<(), MistDBError> {
        let found = self
            .store
            .front()
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        self.position_at(found);

        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<(), MistDBError> {
        let found = self
            .store
            .back()
            .map(|entry| (entry.key().clone(), entry.value().clone()));
        self.position_at(found);

        Ok(())
    }

    fn next(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let found = match self.current.as_ref() {
            Some((current_key, _)) => self
                .store
                .lower_bound(Bound::Excluded(current_key))
                .map(|entry| (entry.key().clone(), entry.value().clone())),
            None => None,
        };
        self.position_at(found);

        self.current()
    }

    fn prev(&mut self) -> Option<(&InternalKey, &Vec<u8>)> {
        let found = match self.current.as_ref() {
            Some((current_key, _)) => self
                .store
                .upper_bound(Bound::Excluded(current_key))
                .map(|entry| (entry.key().clone(), entry.value().clone())),
            None => None,
        };
        self.position_at(found);

        self.current()
    }

    fn current(&self) -> Option<(&InternalKey, &Vec<u8>)> {
        self.current.as_ref().map(|(key, value)| (key, value))
    }
}

/// An iterator over the newest entry of each user key in a memtable.
pub(crate) struct MemTableScan {
    /// The records being scanned.
    store: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// The key to look up the next user key with. `None` once the scan is exhausted.
    next_lookup: Option<InternalKey>,
}

impl Iterator for MemTableScan {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let lookup_key = self.next_lookup.take()?;
        let found = self.store.lower_bound(Bound::Included(&lookup_key))?;
        let entry = Entry::from_internal_key(found.key(), found.value());

        // Sequence number zero sorts after every other record of the same user key
        let last_possible_record = InternalKey::new_for_seeking(entry.user_key().to_vec(), 0);
        self.next_lookup = self
            .store
            .lower_bound(Bound::Excluded(&last_possible_record))
            .map(|record| record.key().clone());

        Some(entry)
    }
}

impl fmt::Debug for MemTableScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTableScan")
            .field("next_lookup", &self.next_lookup)
            .finish()
    }
}
