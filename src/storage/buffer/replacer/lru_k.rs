use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Backward K-distance of a frame: the gap between now and its K-th most
/// recent access. `None` means fewer than K accesses have been recorded,
/// which orders as +infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KDistance {
    Infinite,
    Finite(u64),
}

/// Per-frame access history tracked by the replacer
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }

    fn record(&mut self, timestamp: u64, k: usize) {
        if self.history.len() == k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp);
    }

    fn backward_k_distance(&self, now: u64, k: usize) -> KDistance {
        if self.history.len() < k {
            KDistance::Infinite
        } else {
            KDistance::Finite(now - self.history[self.history.len() - k])
        }
    }

    /// Oldest access still on record, used to break ties among frames with
    /// infinite backward K-distance (plain LRU among them)
    fn least_recent(&self) -> u64 {
        self.history.front().copied().unwrap_or(0)
    }
}

struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    curr_size: usize,
}

/// LRU-K page replacement policy.
///
/// Evicts the evictable frame with the largest backward K-distance; frames
/// with fewer than K recorded accesses have infinite distance and among
/// those the one with the oldest recorded access wins.
pub struct LruKReplacer {
    k: usize,
    capacity: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            capacity: num_frames,
            inner: Mutex::new(ReplacerInner {
                node_store: HashMap::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Record an access to the given frame at the current logical timestamp
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(frame_id < self.capacity, "frame id {} is invalid", frame_id);
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;
        let k = self.k;
        inner
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new)
            .record(timestamp, k);
    }

    /// Toggle whether a frame may be evicted. Adjusts the replacer size only
    /// on an actual transition.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(frame_id < self.capacity, "frame id {} is invalid", frame_id);
        let mut inner = self.inner.lock();
        if let Some(node) = inner.node_store.get_mut(&frame_id) {
            let changed = node.evictable != evictable;
            node.evictable = evictable;
            if changed {
                if evictable {
                    inner.curr_size += 1;
                } else {
                    inner.curr_size -= 1;
                }
            }
        }
    }

    /// Drop a frame from the replacer entirely. Removing a tracked frame
    /// that is not evictable is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.node_store.get(&frame_id) {
            assert!(
                node.evictable,
                "cannot remove non-evictable frame {}",
                frame_id
            );
            inner.curr_size -= 1;
            inner.node_store.remove(&frame_id);
        }
    }

    /// Pick and remove the eviction victim, if any frame is evictable
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        let now = inner.current_timestamp;
        let mut victim: Option<(FrameId, KDistance, u64)> = None;
        for (&frame_id, node) in &inner.node_store {
            if !node.evictable {
                continue;
            }
            let dist = node.backward_k_distance(now, self.k);
            let least_recent = node.least_recent();
            let better = match victim {
                None => true,
                Some((_, best_dist, best_least_recent)) => match (dist, best_dist) {
                    (KDistance::Infinite, KDistance::Finite(_)) => true,
                    (KDistance::Finite(_), KDistance::Infinite) => false,
                    (KDistance::Infinite, KDistance::Infinite) => least_recent < best_least_recent,
                    (KDistance::Finite(a), KDistance::Finite(b)) => {
                        a > b || (a == b && least_recent < best_least_recent)
                    }
                },
            };
            if better {
                victim = Some((frame_id, dist, least_recent));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
        Some(frame_id)
    }

    /// Number of currently evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
