pub mod error;
pub mod iterator;
pub mod key;
mod page;
pub mod tree;

pub use error::BTreeError;
pub use iterator::TreeIterator;
pub use key::IndexKey;
pub use tree::{BPlusTree, UntypedIndex};
