// Not every test binary uses every helper here.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::Result;
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use coraldb::common::types::{Rid, TableOid};
use coraldb::transaction::concurrency::{
    IsolationLevel, LockManager, LockMode, TableHeap, TableWriteRecord, Transaction,
    TransactionError, TransactionManager, WriteType,
};
use coraldb::BufferPoolManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path)?);
    Ok((buffer_pool, file))
}

/// In-memory table heap standing in for the executor-side tuple storage in
/// scenario tests. Values are integers; a tombstone flag marks deletion.
pub struct MemTable {
    pub oid: TableOid,
    rows: Mutex<BTreeMap<Rid, (i64, bool)>>,
}

#[allow(dead_code)]
impl MemTable {
    pub fn new(oid: TableOid) -> Arc<Self> {
        Arc::new(Self {
            oid,
            rows: Mutex::new(BTreeMap::new()),
        })
    }

    /// Insert a live row and hand back its rid
    pub fn insert_value(&self, value: i64) -> Rid {
        let mut rows = self.rows.lock();
        let slot = rows.len() as u32;
        let rid = Rid::new(1, slot);
        rows.insert(rid, (value, false));
        rid
    }

    pub fn rid_of(&self, value: i64) -> Option<Rid> {
        self.rows
            .lock()
            .iter()
            .find(|(_, &(v, _))| v == value)
            .map(|(&rid, _)| rid)
    }

    pub fn rids(&self) -> Vec<Rid> {
        self.rows.lock().keys().copied().collect()
    }

    pub fn value_at(&self, rid: Rid) -> Option<i64> {
        self.rows.lock().get(&rid).map(|&(value, _)| value)
    }

    /// Values of all live rows, in rid order (no locking; used for
    /// READ_UNCOMMITTED scans and final assertions)
    pub fn visible_values(&self) -> Vec<i64> {
        self.rows
            .lock()
            .values()
            .filter(|&&(_, deleted)| !deleted)
            .map(|&(value, _)| value)
            .collect()
    }
}

impl TableHeap for MemTable {
    fn tuple_deleted(&self, rid: Rid) -> bool {
        self.rows
            .lock()
            .get(&rid)
            .map(|&(_, deleted)| deleted)
            .unwrap_or(true)
    }

    fn set_tuple_deleted(&self, rid: Rid, deleted: bool) {
        if let Some(entry) = self.rows.lock().get_mut(&rid) {
            entry.1 = deleted;
        }
    }
}

/// A tiny single-table "database" wired to a lock manager and transaction
/// manager, seeded with rows 233 and 234 like the visibility scenarios use.
#[allow(dead_code)]
pub struct ScenarioDb {
    pub table: Arc<MemTable>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: TransactionManager,
}

#[allow(dead_code)]
impl ScenarioDb {
    pub fn new() -> Arc<Self> {
        let table = MemTable::new(1);
        table.insert_value(233);
        table.insert_value(234);
        let lock_manager = Arc::new(LockManager::default());
        let txn_manager =
            TransactionManager::new(lock_manager.clone(), IsolationLevel::RepeatableRead);
        Arc::new(Self {
            table,
            lock_manager,
            txn_manager,
        })
    }

    /// Executor-style insert: IX on the table, X on the new row, tracked in
    /// the write set for rollback
    pub fn insert(&self, txn: &Arc<Transaction>, value: i64) -> Result<(), TransactionError> {
        self.lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, self.table.oid)?;
        let rid = self.table.insert_value(value);
        self.lock_manager
            .lock_row(txn, LockMode::Exclusive, self.table.oid, rid)?;
        txn.append_table_write(TableWriteRecord {
            oid: self.table.oid,
            rid,
            wtype: WriteType::Insert,
            table: self.table.clone(),
        });
        Ok(())
    }

    /// Executor-style delete of the row holding `value`
    pub fn delete(&self, txn: &Arc<Transaction>, value: i64) -> Result<(), TransactionError> {
        self.lock_manager
            .lock_table(txn, LockMode::IntentionExclusive, self.table.oid)?;
        let rid = self.table.rid_of(value).expect("value present in table");
        self.lock_manager
            .lock_row(txn, LockMode::Exclusive, self.table.oid, rid)?;
        self.table.set_tuple_deleted(rid, true);
        txn.append_table_write(TableWriteRecord {
            oid: self.table.oid,
            rid,
            wtype: WriteType::Delete,
            table: self.table.clone(),
        });
        Ok(())
    }

    /// Executor-style sequential scan under the transaction's isolation
    /// level: no locks at READ_UNCOMMITTED, short S locks at
    /// READ_COMMITTED, held S locks at REPEATABLE_READ
    pub fn scan(&self, txn: &Arc<Transaction>) -> Result<Vec<i64>, TransactionError> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(self.table.visible_values());
        }

        if txn.lock_set().table_lock_mode(self.table.oid).is_none() {
            self.lock_manager
                .lock_table(txn, LockMode::IntentionShared, self.table.oid)?;
        }
        let mut values = Vec::new();
        for rid in self.table.rids() {
            // Rows this transaction already wrote stay under their X lock
            let already_locked = txn.lock_set().row_lock_mode(self.table.oid, rid).is_some();
            if !already_locked {
                self.lock_manager
                    .lock_row(txn, LockMode::Shared, self.table.oid, rid)?;
            }
            if !self.table.tuple_deleted(rid) {
                if let Some(value) = self.table.value_at(rid) {
                    values.push(value);
                }
            }
            if !already_locked && txn.isolation_level() == IsolationLevel::ReadCommitted {
                self.lock_manager
                    .unlock_row(txn, self.table.oid, rid, false)?;
            }
        }
        Ok(values)
    }
}
