//! # StateDB: Persistent Storage Engine
//!
//! The persistence layer for Agora, built on sled's embedded key-value store.
//! Contract records, account balances and counters all land here.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                 | Value                 |
//! |------------|---------------------|-----------------------|
//! | `records`  | `id` (8B BE)        | `bincode(record)`     |
//! | `accounts` | `address` (20B)     | `balance` (16B BE)    |
//! | `metadata` | key (UTF-8)         | `u64` (8B BE)         |
//!
//! Record ids are stored as big-endian u64 so that sled's lexicographic
//! ordering matches numeric ordering; a full scan of `records` yields them
//! in creation order.
//!
//! ## Atomicity
//!
//! Every state transition is written through [`StateDB::commit`], which
//! applies a [`StateBatch`] across all three trees inside one sled
//! transaction. Either every write lands or none does. Owners that only need
//! to commit depend on the [`StateStore`] trait rather than on sled.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, Transactional};
use sled::{Db, Tree};

use crate::identity::Address;
use crate::vault::Amount;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// sled failed to read, write or flush.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// A multi-tree transaction was aborted and nothing was written.
    #[error("transaction aborted: {0}")]
    Transaction(String),

    /// A record could not be encoded or decoded with bincode.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key or value has the wrong shape for its tree.
    #[error("corrupt entry in {tree}: {reason}")]
    Corrupt {
        /// Name of the tree holding the entry.
        tree: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// StateBatch
// ---------------------------------------------------------------------------

/// A set of writes to apply atomically via [`StateDB::commit`].
///
/// Records are serialized when added, so a batch that was built successfully
/// can only fail to commit for storage reasons.
#[derive(Debug, Default, Clone)]
pub struct StateBatch {
    records: Vec<(u64, Vec<u8>)>,
    accounts: Vec<(Address, Amount)>,
    meta: Vec<(String, u64)>,
}

impl StateBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a record write under `id`.
    pub fn put_record<T: Serialize>(&mut self, id: u64, record: &T) -> DbResult<&mut Self> {
        let bytes =
            bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.records.push((id, bytes));
        Ok(self)
    }

    /// Stages an account balance write.
    pub fn put_account(&mut self, address: Address, balance: Amount) -> &mut Self {
        self.accounts.push((address, balance));
        self
    }

    /// Stages a metadata counter write.
    pub fn set_meta(&mut self, key: &str, value: u64) -> &mut Self {
        self.meta.push((key.to_string(), value));
        self
    }

    /// Total number of staged writes.
    pub fn len(&self) -> usize {
        self.records.len() + self.accounts.len() + self.meta.len()
    }

    /// Returns `true` if nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Destination for committed state batches.
///
/// [`StateDB`] is the real store. Anything else implementing this (an
/// in-process recorder, a store that refuses writes) can stand in for it
/// wherever only commits are needed.
pub trait StateStore: Send + Sync {
    /// Applies every write in `batch` atomically. On error nothing was written.
    fn commit(&self, batch: &StateBatch) -> DbResult<()>;
}

impl StateStore for StateDB {
    fn commit(&self, batch: &StateBatch) -> DbResult<()> {
        StateDB::commit(self, batch)
    }
}

// ---------------------------------------------------------------------------
// StateDB
// ---------------------------------------------------------------------------

/// Persistent storage engine for registry and ledger state.
///
/// # Thread Safety
///
/// sled is inherently thread-safe. `StateDB` is cheap to clone and can be
/// shared via `Arc<StateDB>` without external synchronization; callers that
/// need a serial log of transitions must serialize their own commits.
#[derive(Debug, Clone)]
pub struct StateDB {
    db: Db,
    records: Tree,
    accounts: Tree,
    metadata: Tree,
}

impl StateDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is cleaned up when dropped.
    ///
    /// Ideal for unit tests: no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let records = db.open_tree("records")?;
        let accounts = db.open_tree("accounts")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            records,
            accounts,
            metadata,
        })
    }

    // -- Writes -------------------------------------------------------------

    /// Apply every write in `batch` atomically, then flush.
    pub fn commit(&self, batch: &StateBatch) -> DbResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        (&self.records, &self.accounts, &self.metadata)
            .transaction(|(records, accounts, metadata)| {
                for (id, bytes) in &batch.records {
                    records.insert(&id.to_be_bytes()[..], bytes.as_slice())?;
                }
                for (address, balance) in &batch.accounts {
                    accounts.insert(&address.as_bytes()[..], &balance.to_be_bytes()[..])?;
                }
                for (key, value) in &batch.meta {
                    metadata.insert(key.as_bytes(), &value.to_be_bytes()[..])?;
                }
                Ok::<(), sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Abort(()) => DbError::Transaction("state batch".into()),
                TransactionError::Storage(err) => DbError::Sled(err),
            })?;

        self.db.flush()?;
        tracing::debug!(writes = batch.len(), "state batch committed");
        Ok(())
    }

    // -- Records ------------------------------------------------------------

    /// Retrieve a record by id, or `None` if it was never written.
    pub fn get_record<T: DeserializeOwned>(&self, id: u64) -> DbResult<Option<T>> {
        match self.records.get(id.to_be_bytes())? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All records in ascending id order.
    pub fn records<T: DeserializeOwned>(&self) -> DbResult<Vec<(u64, T)>> {
        self.records
            .iter()
            .map(|entry| -> DbResult<(u64, T)> {
                let (key, value) = entry?;
                let id = decode_u64("records", &key)?;
                let record = bincode::deserialize(&value)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok((id, record))
            })
            .collect()
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // -- Accounts -----------------------------------------------------------

    /// Stored balance of `address`, or `None` if the account was never written.
    pub fn get_account(&self, address: &Address) -> DbResult<Option<Amount>> {
        match self.accounts.get(address.as_bytes())? {
            Some(bytes) => Ok(Some(decode_amount("accounts", &bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored accounts in address order.
    pub fn accounts(&self) -> DbResult<Vec<(Address, Amount)>> {
        self.accounts
            .iter()
            .map(|entry| -> DbResult<(Address, Amount)> {
                let (key, value) = entry?;
                let address = Address::from_slice(&key).map_err(|e| DbError::Corrupt {
                    tree: "accounts",
                    reason: e.to_string(),
                })?;
                Ok((address, decode_amount("accounts", &value)?))
            })
            .collect()
    }

    /// Number of stored accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    // -- Metadata -----------------------------------------------------------

    /// Read a metadata counter.
    pub fn get_meta(&self, key: &str) -> DbResult<Option<u64>> {
        match self.metadata.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_u64("metadata", &bytes)?)),
            None => Ok(None),
        }
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_u64(tree: &'static str, bytes: &[u8]) -> DbResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| DbError::Corrupt {
        tree,
        reason: format!("expected 8-byte integer, got {} bytes", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_amount(tree: &'static str, bytes: &[u8]) -> DbResult<Amount> {
    let raw: [u8; 16] = bytes.try_into().map_err(|_| DbError::Corrupt {
        tree,
        reason: format!("expected 16-byte amount, got {} bytes", bytes.len()),
    })?;
    Ok(Amount::from_be_bytes(raw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        amount: u64,
    }

    fn note(title: &str, amount: u64) -> Note {
        Note {
            title: title.into(),
            amount,
        }
    }

    #[test]
    fn open_temporary_database() {
        let db = StateDB::open_temporary().expect("should create temp db");
        assert_eq!(db.record_count(), 0);
        assert_eq!(db.account_count(), 0);
        assert_eq!(db.get_meta("anything").unwrap(), None);
    }

    #[test]
    fn commit_writes_all_trees() {
        let db = StateDB::open_temporary().unwrap();
        let addr = Address::from_bytes([1u8; 20]);

        let mut batch = StateBatch::new();
        batch.put_record(1, &note("first", 10)).unwrap();
        batch.put_account(addr, 500).set_meta("count", 1);
        assert_eq!(batch.len(), 3);
        db.commit(&batch).unwrap();

        assert_eq!(db.get_record::<Note>(1).unwrap(), Some(note("first", 10)));
        assert_eq!(db.get_account(&addr).unwrap(), Some(500));
        assert_eq!(db.get_meta("count").unwrap(), Some(1));
    }

    #[test]
    fn empty_batch_is_noop() {
        let db = StateDB::open_temporary().unwrap();
        db.commit(&StateBatch::new()).unwrap();
        assert_eq!(db.record_count(), 0);
    }

    #[test]
    fn records_scan_in_numeric_order() {
        let db = StateDB::open_temporary().unwrap();
        let mut batch = StateBatch::new();
        // 256 would sort before 2 under little-endian keys.
        for id in [256u64, 2, 1, 3] {
            batch.put_record(id, &note(&id.to_string(), id)).unwrap();
        }
        db.commit(&batch).unwrap();

        let ids: Vec<u64> = db.records::<Note>().unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3, 256]);
    }

    #[test]
    fn later_writes_overwrite() {
        let db = StateDB::open_temporary().unwrap();
        let addr = Address::from_bytes([2u8; 20]);

        let mut first = StateBatch::new();
        first.put_record(1, &note("a", 1)).unwrap();
        first.put_account(addr, 10);
        db.commit(&first).unwrap();

        let mut second = StateBatch::new();
        second.put_record(1, &note("a", 2)).unwrap();
        second.put_account(addr, 4);
        db.commit(&second).unwrap();

        assert_eq!(db.get_record::<Note>(1).unwrap(), Some(note("a", 2)));
        assert_eq!(db.get_account(&addr).unwrap(), Some(4));
        assert_eq!(db.record_count(), 1);
    }

    #[test]
    fn accounts_roundtrip() {
        let db = StateDB::open_temporary().unwrap();
        let a = Address::from_bytes([0xAA; 20]);
        let b = Address::from_bytes([0x0B; 20]);
        let mut batch = StateBatch::new();
        batch.put_account(a, 7).put_account(b, 9);
        db.commit(&batch).unwrap();

        assert_eq!(db.accounts().unwrap(), vec![(b, 9), (a, 7)]);
    }

    #[test]
    fn missing_entries_return_none() {
        let db = StateDB::open_temporary().unwrap();
        assert!(db.get_record::<Note>(42).unwrap().is_none());
        assert!(db.get_account(&Address::ZERO).unwrap().is_none());
    }

    #[test]
    fn persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = StateDB::open(dir.path()).expect("should open db");
            let mut batch = StateBatch::new();
            batch.put_record(1, &note("kept", 5)).unwrap();
            batch.set_meta("count", 1);
            db.commit(&batch).unwrap();
        }

        let db = StateDB::open(dir.path()).expect("should reopen db");
        assert_eq!(db.get_record::<Note>(1).unwrap(), Some(note("kept", 5)));
        assert_eq!(db.get_meta("count").unwrap(), Some(1));
    }

    #[test]
    fn decode_u64_rejects_short_values() {
        let err = decode_u64("metadata", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DbError::Corrupt { tree: "metadata", .. }));
    }

    #[test]
    fn balances_past_u64_are_stored_as_16_bytes() {
        let db = StateDB::open_temporary().unwrap();
        let addr = Address::from_bytes([0x20; 20]);
        let balance: Amount = 20_000_000_000_000_000_000;

        let mut batch = StateBatch::new();
        batch.put_account(addr, balance);
        db.commit(&batch).unwrap();

        let raw = db.accounts.get(addr.as_bytes()).unwrap().unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(db.get_account(&addr).unwrap(), Some(balance));
        assert_eq!(db.accounts().unwrap(), vec![(addr, balance)]);
    }

    #[test]
    fn eight_byte_balances_are_corrupt() {
        let db = StateDB::open_temporary().unwrap();
        let addr = Address::from_bytes([0x08; 20]);
        db.accounts.insert(addr.as_bytes(), &5u64.to_be_bytes()[..]).unwrap();

        let err = db.get_account(&addr).unwrap_err();
        assert!(matches!(err, DbError::Corrupt { tree: "accounts", .. }));
        assert!(db.accounts().is_err());
    }

    #[test]
    fn state_db_commits_through_the_store_trait() {
        let db = StateDB::open_temporary().unwrap();
        let store: &dyn StateStore = &db;
        let mut batch = StateBatch::new();
        batch.set_meta("count", 3);
        store.commit(&batch).unwrap();
        assert_eq!(db.get_meta("count").unwrap(), Some(3));
    }
}
