//! Wait-for graph deadlock detection.
//!
//! A dedicated thread wakes every detection interval, rebuilds the graph
//! from the lock queues and aborts the youngest transaction on each cycle
//! until none remain. This is the only code path that holds both resource
//! map latches together with queue latches.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use log::{debug, warn};

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockRequestQueue};
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

impl LockManager {
    /// Spawn the background detector thread. Idempotent.
    pub fn start_deadlock_detection(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::downgrade(self);
        let interval = self.detection_interval;
        let handle = thread::spawn(move || {
            debug!("deadlock detector started");
            loop {
                thread::sleep(interval);
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.running.load(Ordering::SeqCst) {
                    break;
                }
                manager.run_cycle_detection();
            }
            debug!("deadlock detector stopped");
        });
        *self.detector.lock() = Some(handle);
    }

    /// Stop the detector thread and wait for it to exit
    pub fn stop_deadlock_detection(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detection pass: rebuild the wait-for graph from every queue,
    /// then abort victims until the graph is acyclic.
    ///
    /// Edges run from each queued (ungranted) request to every granted
    /// request on the same resource, including head-of-queue requests that
    /// are merely awaiting compatibility. Vertices and adjacency sets are
    /// ordered by ascending transaction id so detection is deterministic.
    pub fn run_cycle_detection(&self) {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();
        let mut waits_for = self.waits_for.lock();
        waits_for.clear();

        let mut txn_handles: HashMap<TxnId, Arc<Transaction>> = HashMap::new();
        let mut waiter_queues: HashMap<TxnId, Vec<Arc<LockRequestQueue>>> = HashMap::new();

        for queue in table_map.values().chain(row_map.values()) {
            let state = queue.state.lock();
            for request in &state.waiting {
                let waiter = request.txn.id();
                txn_handles.entry(waiter).or_insert_with(|| request.txn.clone());
                waiter_queues.entry(waiter).or_default().push(queue.clone());
                for &holder in state.granted.keys() {
                    if holder != waiter {
                        waits_for.entry(waiter).or_default().insert(holder);
                    }
                }
            }
        }

        while let Some(victim) = youngest_on_cycle(&waits_for) {
            warn!("deadlock detected, aborting youngest transaction {}", victim);
            if let Some(txn) = txn_handles.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            waits_for.remove(&victim);
            for edges in waits_for.values_mut() {
                edges.remove(&victim);
            }
            // Wake the victim on every queue it sleeps on, under the queue
            // latch so the wakeup cannot slip between its predicate check
            // and its wait.
            if let Some(queues) = waiter_queues.get(&victim) {
                for queue in queues {
                    let _state = queue.state.lock();
                    queue.cv.notify_all();
                }
            }
        }

        waits_for.clear();
    }
}

/// Find a cycle via depth-first search in ascending txn-id order and
/// return its youngest (largest id) member
fn youngest_on_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
    let mut visited = HashSet::new();
    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        if let Some(cycle) = dfs(start, graph, &mut visited, &mut path, &mut on_path) {
            return cycle.into_iter().max();
        }
    }
    None
}

fn dfs(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
    on_path: &mut HashSet<TxnId>,
) -> Option<Vec<TxnId>> {
    visited.insert(node);
    path.push(node);
    on_path.insert(node);

    if let Some(successors) = graph.get(&node) {
        for &next in successors {
            if on_path.contains(&next) {
                let start = path.iter().position(|&txn| txn == next)?;
                return Some(path[start..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(next, graph, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}
