// Extended key/value store
//
// Durable (owner, key) -> value entries for the SEP101 native contract.
// Committed entries live in RocksDB; a block's writes are staged in
// `PendingWrites` on top of an `ExtSnapshot` of the previous height and only
// reach the medium through the block commit.

use alloy_primitives::{Address, B256};
use rocksdb::{WriteBatch, DB};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

pub mod commit;
pub mod journal;

pub use commit::{encode_entry, fold_ext_root};
pub use journal::{Journal, JournalError, Revertible};

/// Longest key accepted by `set` and `get`
pub const MAX_KEY_LEN: usize = 256;

/// Largest value accepted by `set`
pub const MAX_VALUE_LEN: usize = 24 * 1024;

const ENTRY_PREFIX: &[u8] = b"sep101_entry_";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage medium failure: {0}")]
    Medium(#[from] rocksdb::Error),

    #[error("corrupted record under {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

/// Reasons a key or value is refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("key is {0} bytes, limit is {MAX_KEY_LEN}")]
    KeyTooLong(usize),

    #[error("value is {0} bytes, limit is {MAX_VALUE_LEN}")]
    ValueTooLong(usize),
}

pub fn check_key(key: &[u8]) -> Result<(), BoundsError> {
    match key.len() {
        0 => Err(BoundsError::EmptyKey),
        n if n > MAX_KEY_LEN => Err(BoundsError::KeyTooLong(n)),
        _ => Ok(()),
    }
}

pub fn check_value(value: &[u8]) -> Result<(), BoundsError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(BoundsError::ValueTooLong(value.len()));
    }
    Ok(())
}

/// Entry identity. Orders by owner bytes, then key bytes, which is the
/// lexicographic order of `owner ++ key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub owner: Address,
    pub key: Vec<u8>,
}

impl EntryKey {
    pub fn new(owner: Address, key: impl Into<Vec<u8>>) -> Self {
        Self {
            owner,
            key: key.into(),
        }
    }

    /// RocksDB key for this entry
    fn db_key(&self) -> Vec<u8> {
        let mut key = ENTRY_PREFIX.to_vec();
        key.extend_from_slice(self.owner.as_slice());
        key.extend_from_slice(&self.key);
        key
    }
}

/// Committed extended-store entries
#[derive(Clone)]
pub struct ExtStore {
    db: Arc<DB>,
}

impl ExtStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    /// Read a committed entry. `Some(vec![])` (stored empty) differs from `None`.
    pub fn get(&self, owner: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = EntryKey::new(*owner, key);
        Ok(self.db.get(entry.db_key())?)
    }

    /// Snapshot of the committed entries for executing block `height`
    pub fn begin_block(&self, height: u64) -> ExtSnapshot {
        trace!(height, "ext store snapshot taken");
        ExtSnapshot {
            height,
            store: self.clone(),
        }
    }

    /// Stage a block's writes into `batch`
    pub(crate) fn write_batch(&self, batch: &mut WriteBatch, writes: &PendingWrites) {
        for (entry, value) in writes.iter() {
            batch.put(entry.db_key(), value);
        }
    }
}

/// Read view of the store as of the start of one block
#[derive(Clone)]
pub struct ExtSnapshot {
    height: u64,
    store: ExtStore,
}

impl ExtSnapshot {
    /// Height of the block executing on top of this snapshot
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn get(&self, owner: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get(owner, key)
    }
}

/// Writes staged during one block, in commit order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWrites {
    entries: BTreeMap<EntryKey, Vec<u8>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The staged value, if this block wrote the entry
    pub fn get(&self, entry: &EntryKey) -> Option<&Vec<u8>> {
        self.entries.get(entry)
    }

    /// Stage a full replacement, returning the previously staged value
    pub fn put(&mut self, entry: EntryKey, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(entry, value)
    }

    /// Undo a `put` given the value it returned
    pub fn restore(&mut self, entry: EntryKey, previous: Option<Vec<u8>>) {
        match previous {
            Some(value) => {
                self.entries.insert(entry, value);
            }
            None => {
                self.entries.remove(&entry);
            }
        }
    }

    /// Entries in ascending (owner, key) order
    pub fn iter(&self) -> impl Iterator<Item = (&EntryKey, &Vec<u8>)> {
        self.entries.iter()
    }

    /// Layered read: staged value first, then the snapshot
    pub fn read_through(
        &self,
        snapshot: &ExtSnapshot,
        owner: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = EntryKey::new(*owner, key);
        match self.entries.get(&entry) {
            Some(value) => Ok(Some(value.clone())),
            None => snapshot.get(owner, key),
        }
    }

    /// Hash contribution of these writes on top of `prev_root`
    pub fn fold_root(&self, prev_root: B256) -> B256 {
        fold_ext_root(prev_root, self.iter())
    }
}
