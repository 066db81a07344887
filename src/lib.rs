// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BPlusTree, BTreeError, IndexKey};
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use storage::page::PageManager;
pub use transaction::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionError, TransactionManager,
};
