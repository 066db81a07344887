use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::config::CYCLE_DETECTION_INTERVAL;
use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

pub(super) const LOCK_MODE_COUNT: usize = 5;

impl LockMode {
    pub(super) fn idx(self) -> usize {
        match self {
            LockMode::IntentionShared => 0,
            LockMode::IntentionExclusive => 1,
            LockMode::Shared => 2,
            LockMode::SharedIntentionExclusive => 3,
            LockMode::Exclusive => 4,
        }
    }

    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }

    /// Whether a request in this mode is compatible with every lock
    /// currently granted on the resource
    fn compatible_with(self, counts: &[usize; LOCK_MODE_COUNT]) -> bool {
        let held = |mode: LockMode| counts[mode.idx()] > 0;
        match self {
            LockMode::IntentionShared => !held(LockMode::Exclusive),
            LockMode::IntentionExclusive => {
                !held(LockMode::Shared)
                    && !held(LockMode::SharedIntentionExclusive)
                    && !held(LockMode::Exclusive)
            }
            LockMode::Shared => {
                !held(LockMode::IntentionExclusive)
                    && !held(LockMode::SharedIntentionExclusive)
                    && !held(LockMode::Exclusive)
            }
            LockMode::SharedIntentionExclusive => {
                !held(LockMode::IntentionExclusive)
                    && !held(LockMode::Shared)
                    && !held(LockMode::SharedIntentionExclusive)
                    && !held(LockMode::Exclusive)
            }
            LockMode::Exclusive => counts.iter().all(|&count| count == 0),
        }
    }

    /// Permitted upgrade transitions
    fn can_upgrade_to(self, target: LockMode) -> bool {
        match (self, target) {
            (LockMode::IntentionShared, _) => target != LockMode::IntentionShared,
            (LockMode::Shared, LockMode::Exclusive | LockMode::SharedIntentionExclusive) => true,
            (LockMode::IntentionExclusive, LockMode::Exclusive | LockMode::SharedIntentionExclusive) => true,
            (LockMode::SharedIntentionExclusive, LockMode::Exclusive) => true,
            _ => false,
        }
    }
}

/// A queued (not yet granted) lock request
pub(super) struct LockRequest {
    pub(super) txn: Arc<Transaction>,
    pub(super) mode: LockMode,
}

pub(super) struct QueueState {
    /// FIFO wait queue; an upgrading request jumps to the front
    pub(super) waiting: VecDeque<LockRequest>,
    /// Granted locks by transaction
    pub(super) granted: HashMap<TxnId, LockMode>,
    /// Granted lock counts per mode, for compatibility checks
    pub(super) granted_counts: [usize; LOCK_MODE_COUNT],
    /// The single transaction allowed to be mid-upgrade on this queue
    pub(super) upgrading: Option<TxnId>,
}

/// Per-resource request queue plus its condition variable
pub(super) struct LockRequestQueue {
    pub(super) state: Mutex<QueueState>,
    pub(super) cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                waiting: VecDeque::new(),
                granted: HashMap::new(),
                granted_counts: [0; LOCK_MODE_COUNT],
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Multi-granularity two-phase lock manager over tables and rows.
///
/// Map latches and queue latches are never held together outside the
/// deadlock detector: lookups clone the queue handle under the map latch,
/// release it, then latch the queue.
pub struct LockManager {
    pub(super) table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(super) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(super) waits_for: Mutex<BTreeMap<TxnId, BTreeSet<TxnId>>>,
    pub(super) detection_interval: Duration,
    pub(super) running: AtomicBool,
    pub(super) detector: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(CYCLE_DETECTION_INTERVAL)
    }
}

impl LockManager {
    pub fn new(detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(BTreeMap::new()),
            detection_interval,
            running: AtomicBool::new(false),
            detector: Mutex::new(None),
        }
    }

    /// Acquire (or upgrade to) a table lock, blocking until it is granted
    /// or the transaction is aborted
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        self.check_table_admission(txn, mode)?;

        let queue = self.table_queue(oid);
        let mut state = queue.state.lock();

        if let Some(&prev) = state.granted.get(&txn.id()) {
            if prev == mode {
                return Ok(());
            }
            if !prev.can_upgrade_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
            if state.upgrading.is_some_and(|upgrader| upgrader != txn.id()) {
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            // Drop the old grant and take the priority position in front
            state.upgrading = Some(txn.id());
            state.granted_counts[prev.idx()] -= 1;
            state.granted.remove(&txn.id());
            state.waiting.push_front(LockRequest {
                txn: txn.clone(),
                mode,
            });
            txn.lock_set().remove_table(prev, oid);
        } else {
            state.waiting.push_back(LockRequest {
                txn: txn.clone(),
                mode,
            });
        }

        self.wait_for_grant(&queue, state, txn, mode)?;
        txn.lock_set().insert_table(mode, oid);
        Ok(())
    }

    /// Release a table lock, checking the unlock protocol and applying the
    /// 2PL state transition
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<(), TransactionError> {
        {
            let locks = txn.lock_set();
            if locks.table_lock_mode(oid).is_none() {
                drop(locks);
                return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
            }
            if locks.has_row_locks_on(oid) {
                drop(locks);
                return Err(self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
            }
        }
        self.release_table_lock(txn, oid, false);
        Ok(())
    }

    /// Acquire (or upgrade to) a row lock. The transaction must already
    /// hold an appropriate lock on the owning table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        self.check_row_admission(txn, mode, oid)?;

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();

        if let Some(&prev) = state.granted.get(&txn.id()) {
            if prev == mode {
                return Ok(());
            }
            if !prev.can_upgrade_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
            if state.upgrading.is_some_and(|upgrader| upgrader != txn.id()) {
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = Some(txn.id());
            state.granted_counts[prev.idx()] -= 1;
            state.granted.remove(&txn.id());
            state.waiting.push_front(LockRequest {
                txn: txn.clone(),
                mode,
            });
            txn.lock_set().remove_row(prev, oid, rid);
        } else {
            state.waiting.push_back(LockRequest {
                txn: txn.clone(),
                mode,
            });
        }

        self.wait_for_grant(&queue, state, txn, mode)?;
        txn.lock_set().insert_row(mode, oid, rid);
        Ok(())
    }

    /// Release a row lock. With `force` the call is idempotent, skips the
    /// protocol checks and leaves the 2PL state machine untouched; commit
    /// and abort cleanup rely on this.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<(), TransactionError> {
        if !force && txn.lock_set().row_lock_mode(oid, rid).is_none() {
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        }

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();
        if let Some(mode) = state.granted.remove(&txn.id()) {
            state.granted_counts[mode.idx()] -= 1;
            queue.cv.notify_all();
            if !force {
                self.maybe_transition_to_shrinking(txn, mode);
            }
            txn.lock_set().remove_row(mode, oid, rid);
        }
        Ok(())
    }

    /// Release every lock the transaction still holds: rows per table
    /// first, then the tables themselves. Used by commit and abort, so the
    /// releases are forced and state-preserving.
    pub fn release_locks(&self, txn: &Arc<Transaction>) {
        let (rows, tables) = {
            let locks = txn.lock_set();
            let mut rows: Vec<(TableOid, Rid)> = Vec::new();
            for (&oid, rids) in locks.shared_rows.iter().chain(locks.exclusive_rows.iter()) {
                rows.extend(rids.iter().map(|&rid| (oid, rid)));
            }
            let mut tables: Vec<TableOid> = Vec::new();
            for set in [
                &locks.shared_tables,
                &locks.exclusive_tables,
                &locks.intention_shared_tables,
                &locks.intention_exclusive_tables,
                &locks.shared_intention_exclusive_tables,
            ] {
                tables.extend(set.iter().copied());
            }
            (rows, tables)
        };

        for (oid, rid) in rows {
            let _ = self.unlock_row(txn, oid, rid, true);
        }
        for oid in tables {
            self.release_table_lock(txn, oid, true);
        }
    }

    /// Shared wait loop: sleep on the queue's condition variable until this
    /// transaction's request is at the head and compatible with everything
    /// granted, or the transaction has been aborted out from under us.
    fn wait_for_grant<'q>(
        &self,
        queue: &'q LockRequestQueue,
        mut state: MutexGuard<'q, QueueState>,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        loop {
            if txn.state() == TransactionState::Aborted {
                // A deadlock victim must clear its request and the upgrade
                // marker, then wake the next candidate.
                state.waiting.retain(|request| request.txn.id() != txn.id());
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Err(TransactionError::AbortedDuringWait(txn.id()));
            }
            let grantable = match state.waiting.front() {
                Some(request) if request.txn.id() == txn.id() => {
                    request.mode.compatible_with(&state.granted_counts)
                }
                _ => false,
            };
            if grantable {
                break;
            }
            queue.cv.wait(&mut state);
        }

        state.waiting.pop_front();
        state.granted.insert(txn.id(), mode);
        state.granted_counts[mode.idx()] += 1;
        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        queue.cv.notify_all();
        Ok(())
    }

    fn release_table_lock(&self, txn: &Arc<Transaction>, oid: TableOid, force: bool) {
        let queue = self.table_queue(oid);
        let mut state = queue.state.lock();
        if let Some(mode) = state.granted.remove(&txn.id()) {
            state.granted_counts[mode.idx()] -= 1;
            queue.cv.notify_all();
            if !force {
                self.maybe_transition_to_shrinking(txn, mode);
            }
            txn.lock_set().remove_table(mode, oid);
        }
    }

    /// Releasing S or X under REPEATABLE_READ, or X under the weaker
    /// levels, moves a growing transaction into its shrinking phase
    fn maybe_transition_to_shrinking(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    /// Isolation-level admission rules for table locks
    fn check_table_admission(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if !matches!(mode, LockMode::Exclusive | LockMode::IntentionExclusive) {
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Admission rules for row locks, including the required table lock
    fn check_row_admission(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        if mode.is_intention() {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        let state = txn.state();
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking && mode != LockMode::Shared {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if mode != LockMode::Exclusive {
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
        }

        let table_lock_present = {
            let locks = txn.lock_set();
            if mode == LockMode::Exclusive {
                locks.exclusive_tables.contains(&oid)
                    || locks.intention_exclusive_tables.contains(&oid)
                    || locks.shared_intention_exclusive_tables.contains(&oid)
            } else {
                locks.table_lock_mode(oid).is_some()
            }
        };
        if !table_lock_present {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }
        Ok(())
    }

    /// Abort the transaction and build the matching error; the state change
    /// is atomic with raising the signal
    fn abort_txn(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort(txn.id(), reason)
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let mut counts = [0usize; LOCK_MODE_COUNT];

        // Empty resource admits everything
        for mode in [IntentionShared, IntentionExclusive, Shared, SharedIntentionExclusive, Exclusive] {
            assert!(mode.compatible_with(&counts));
        }

        // Against a granted IS: everything but X
        counts[IntentionShared.idx()] = 1;
        assert!(IntentionShared.compatible_with(&counts));
        assert!(IntentionExclusive.compatible_with(&counts));
        assert!(Shared.compatible_with(&counts));
        assert!(SharedIntentionExclusive.compatible_with(&counts));
        assert!(!Exclusive.compatible_with(&counts));

        // Against a granted IX: only IS and IX
        counts = [0; LOCK_MODE_COUNT];
        counts[IntentionExclusive.idx()] = 1;
        assert!(IntentionShared.compatible_with(&counts));
        assert!(IntentionExclusive.compatible_with(&counts));
        assert!(!Shared.compatible_with(&counts));
        assert!(!SharedIntentionExclusive.compatible_with(&counts));
        assert!(!Exclusive.compatible_with(&counts));

        // Against a granted S: only IS and S
        counts = [0; LOCK_MODE_COUNT];
        counts[Shared.idx()] = 1;
        assert!(IntentionShared.compatible_with(&counts));
        assert!(!IntentionExclusive.compatible_with(&counts));
        assert!(Shared.compatible_with(&counts));
        assert!(!SharedIntentionExclusive.compatible_with(&counts));
        assert!(!Exclusive.compatible_with(&counts));

        // Against a granted SIX: only IS
        counts = [0; LOCK_MODE_COUNT];
        counts[SharedIntentionExclusive.idx()] = 1;
        assert!(IntentionShared.compatible_with(&counts));
        assert!(!IntentionExclusive.compatible_with(&counts));
        assert!(!Shared.compatible_with(&counts));
        assert!(!SharedIntentionExclusive.compatible_with(&counts));
        assert!(!Exclusive.compatible_with(&counts));

        // Against a granted X: nothing
        counts = [0; LOCK_MODE_COUNT];
        counts[Exclusive.idx()] = 1;
        for mode in [IntentionShared, IntentionExclusive, Shared, SharedIntentionExclusive, Exclusive] {
            assert!(!mode.compatible_with(&counts));
        }
    }

    #[test]
    fn test_upgrade_transitions() {
        use LockMode::*;
        assert!(IntentionShared.can_upgrade_to(Shared));
        assert!(IntentionShared.can_upgrade_to(Exclusive));
        assert!(IntentionShared.can_upgrade_to(IntentionExclusive));
        assert!(IntentionShared.can_upgrade_to(SharedIntentionExclusive));
        assert!(Shared.can_upgrade_to(Exclusive));
        assert!(Shared.can_upgrade_to(SharedIntentionExclusive));
        assert!(IntentionExclusive.can_upgrade_to(Exclusive));
        assert!(IntentionExclusive.can_upgrade_to(SharedIntentionExclusive));
        assert!(SharedIntentionExclusive.can_upgrade_to(Exclusive));

        assert!(!Shared.can_upgrade_to(IntentionShared));
        assert!(!Shared.can_upgrade_to(IntentionExclusive));
        assert!(!Exclusive.can_upgrade_to(Shared));
        assert!(!IntentionExclusive.can_upgrade_to(Shared));
        assert!(!SharedIntentionExclusive.can_upgrade_to(Shared));
    }
}
