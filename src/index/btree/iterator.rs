use std::marker::PhantomData;
use log::warn;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::LeafPage;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over the tree's leaf chain in key order.
///
/// Each step takes a short-lived pin on the current leaf; the position is
/// not stable across concurrent structural modifications of the tree.
pub struct TreeIterator<'a, K: IndexKey> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    index: usize,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> TreeIterator<'a, K> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            page_id,
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn end(bpm: &'a BufferPoolManager) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }
}

impl<K: IndexKey> Iterator for TreeIterator<'_, K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = match self.bpm.fetch_page_basic(self.page_id) {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("index iterator lost page {}: {}", self.page_id, e);
                    self.page_id = INVALID_PAGE_ID;
                    return None;
                }
            };
            let page = guard.page().read();
            let leaf = LeafPage::<K>::new(&page.data);

            // The slot may have fallen off the page (or the leaf may be an
            // empty root); cross the sibling chain.
            if self.index >= leaf.size() {
                self.page_id = leaf.next_page_id();
                self.index = 0;
                continue;
            }

            let item = (leaf.key_at(self.index), leaf.rid_at(self.index));
            self.index += 1;
            if self.index >= leaf.size() {
                self.page_id = leaf.next_page_id();
                self.index = 0;
            }
            return Some(item);
        }
    }
}
