use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::{debug, error};
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState, WriteType,
};

/// Creates and tracks transactions, and drives commit and abort
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    default_isolation: IsolationLevel,
    transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, default_isolation: IsolationLevel) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1), // ids start from 1
            lock_manager,
            default_isolation,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        debug!("begin transaction {} at {:?}", txn_id, isolation_level);
        self.transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Begin a new transaction at the manager's default isolation level
    pub fn begin_default(&self) -> Arc<Transaction> {
        self.begin(self.default_isolation)
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release every lock still held (rows first, then tables) and
    /// mark the transaction committed
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        self.lock_manager.release_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.transactions.lock().remove(&txn.id());
        debug!("transaction {} committed", txn.id());
        Ok(())
    }

    /// Abort: undo the write sets, then release every lock with force
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }

        let writes = txn.take_write_sets();

        // Undo index entries newest-first: an inserted entry is deleted, a
        // deleted entry is reinserted.
        for record in writes.index.iter().rev() {
            let result = match record.wtype {
                WriteType::Insert => record.index.remove_encoded(&record.key),
                WriteType::Delete => record
                    .index
                    .insert_encoded(&record.key, record.rid)
                    .map(|_| ()),
            };
            if let Err(e) = result {
                error!(
                    "transaction {}: index rollback for rid {} failed: {}",
                    txn.id(),
                    record.rid,
                    e
                );
            }
        }

        // Flip the delete flag of every touched tuple back
        for record in &writes.table {
            let deleted = record.table.tuple_deleted(record.rid);
            record.table.set_tuple_deleted(record.rid, !deleted);
        }

        self.lock_manager.release_locks(txn);
        txn.set_state(TransactionState::Aborted);
        self.transactions.lock().remove(&txn.id());
        debug!("transaction {} aborted", txn.id());
        Ok(())
    }
}
