use std::time::Duration;

/// Default number of frames in the buffer pool
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default K for the LRU-K replacer
pub const DEFAULT_REPLACER_K: usize = 10;

/// How often the deadlock detector wakes up
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
