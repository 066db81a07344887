use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Invalid node capacity: {0}")]
    InvalidCapacity(String),

    #[error("Corrupt index page {0}: unknown page type tag")]
    CorruptPage(PageId),
}
