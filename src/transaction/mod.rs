pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionError,
    TransactionManager, TransactionState,
};
