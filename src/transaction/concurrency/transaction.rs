use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::index::btree::UntypedIndex;
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// 2PL transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Closed set of protocol violations that abort a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    AttemptedIntentionLockOnRow,
    IncompatibleUpgrade,
    UpgradeConflict,
    TableLockNotPresent,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbortReason::LockOnShrinking => "LOCK_ON_SHRINKING",
            AbortReason::LockSharedOnReadUncommitted => "LOCK_SHARED_ON_READ_UNCOMMITTED",
            AbortReason::AttemptedUnlockButNoLockHeld => "ATTEMPTED_UNLOCK_BUT_NO_LOCK_HELD",
            AbortReason::TableUnlockedBeforeUnlockingRows => "TABLE_UNLOCKED_BEFORE_UNLOCKING_ROWS",
            AbortReason::AttemptedIntentionLockOnRow => "ATTEMPTED_INTENTION_LOCK_ON_ROW",
            AbortReason::IncompatibleUpgrade => "INCOMPATIBLE_UPGRADE",
            AbortReason::UpgradeConflict => "UPGRADE_CONFLICT",
            AbortReason::TableLockNotPresent => "TABLE_LOCK_NOT_PRESENT",
        };
        f.write_str(name)
    }
}

/// Errors raised by the concurrency layer. Setting the transaction to
/// ABORTED is atomic with raising `Abort`.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {0} aborted: {1}")]
    Abort(TxnId, AbortReason),

    #[error("transaction {0} was aborted while waiting for a lock")]
    AbortedDuringWait(TxnId),

    #[error("transaction {0} is not in a state that allows this operation")]
    InvalidState(TxnId),
}

/// Kind of a tracked modification, for rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
}

/// Collaborator interface to tuple storage: the transaction manager flips
/// delete flags through it when rolling back.
pub trait TableHeap: Send + Sync {
    fn tuple_deleted(&self, rid: Rid) -> bool;
    fn set_tuple_deleted(&self, rid: Rid, deleted: bool);
}

/// One tracked table modification
pub struct TableWriteRecord {
    pub oid: TableOid,
    pub rid: Rid,
    pub wtype: WriteType,
    pub table: Arc<dyn TableHeap>,
}

/// One tracked index modification; the key is stored in its page encoding
pub struct IndexWriteRecord {
    pub wtype: WriteType,
    pub key: Vec<u8>,
    pub rid: Rid,
    pub index: Arc<dyn UntypedIndex>,
}

/// Every lock a transaction currently holds, split by mode
#[derive(Default)]
pub struct LockSet {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSet {
    fn table_set(&self, mode: LockMode) -> &HashSet<TableOid> {
        match mode {
            LockMode::Shared => &self.shared_tables,
            LockMode::Exclusive => &self.exclusive_tables,
            LockMode::IntentionShared => &self.intention_shared_tables,
            LockMode::IntentionExclusive => &self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_tables,
        }
    }

    fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    pub fn insert_table(&mut self, mode: LockMode, oid: TableOid) {
        self.table_set_mut(mode).insert(oid);
    }

    pub fn remove_table(&mut self, mode: LockMode, oid: TableOid) {
        self.table_set_mut(mode).remove(&oid);
    }

    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        [
            LockMode::Exclusive,
            LockMode::SharedIntentionExclusive,
            LockMode::Shared,
            LockMode::IntentionExclusive,
            LockMode::IntentionShared,
        ]
        .into_iter()
        .find(|&mode| self.table_set(mode).contains(&oid))
    }

    pub fn insert_row(&mut self, mode: LockMode, oid: TableOid, rid: Rid) {
        let rows = match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("intention locks are never taken on rows"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub fn remove_row(&mut self, mode: LockMode, oid: TableOid, rid: Rid) {
        let rows = match mode {
            LockMode::Shared => &mut self.shared_rows,
            LockMode::Exclusive => &mut self.exclusive_rows,
            _ => unreachable!("intention locks are never taken on rows"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
        }
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        if self
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            return Some(LockMode::Exclusive);
        }
        if self
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            return Some(LockMode::Shared);
        }
        None
    }

    /// Whether any row lock (shared or exclusive) on this table survives
    pub fn has_row_locks_on(&self, oid: TableOid) -> bool {
        self.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || self
                .exclusive_rows
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }
}

/// Write sets tracked for rollback
#[derive(Default)]
pub struct WriteSet {
    pub table: Vec<TableWriteRecord>,
    pub index: Vec<IndexWriteRecord>,
}

/// An active database transaction. Shared between the executor thread, the
/// lock manager and the deadlock detector, so state and bookkeeping sit
/// behind their own mutexes.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSet>,
    writes: Mutex<WriteSet>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSet::default()),
            writes: Mutex::new(WriteSet::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn lock_set(&self) -> MutexGuard<'_, LockSet> {
        self.locks.lock()
    }

    pub fn append_table_write(&self, record: TableWriteRecord) {
        self.writes.lock().table.push(record);
    }

    pub fn append_index_write(&self, record: IndexWriteRecord) {
        self.writes.lock().index.push(record);
    }

    pub(crate) fn take_write_sets(&self) -> WriteSet {
        std::mem::take(&mut *self.writes.lock())
    }
}
