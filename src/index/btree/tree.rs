use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    header_root, node_kind, node_max_size, node_min_size, node_size, set_header_root,
    InternalPage, InternalPageMut, LeafPage, LeafPageMut, NodeKind, INTERNAL_HEADER_SIZE,
    LEAF_HEADER_SIZE,
};
use crate::storage::buffer::{BufferPoolManager, WritePageGuard};

/// Concurrent B+Tree index over fixed-width keys.
///
/// The tree owns only its header page id; every page is reached through
/// the buffer pool. Readers descend with read-latch crabbing; writers hold
/// a path of write latches, releasing all ancestors as soon as the current
/// node cannot split (insert) or underflow (delete).
pub struct BPlusTree<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<K>,
}

/// Per-operation descent state: the header guard (held only while the root
/// might change) and the maximal unsafe suffix of the root-to-leaf path.
struct Context<'a> {
    header: Option<WritePageGuard<'a>>,
    root_page_id: PageId,
    path: Vec<WritePageGuard<'a>>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Create a new index, allocating its header page from the buffer pool
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        if leaf_max_size < 2 {
            return Err(BTreeError::InvalidCapacity(format!(
                "leaf max size {} is below the minimum of 2",
                leaf_max_size
            )));
        }
        if internal_max_size < 3 {
            return Err(BTreeError::InvalidCapacity(format!(
                "internal max size {} is below the minimum of 3",
                internal_max_size
            )));
        }
        // A page must fit max_size + 1 entries: inserts overflow by one
        // before the split happens.
        let leaf_pair = K::ENCODED_SIZE + 8;
        let internal_pair = K::ENCODED_SIZE + 4;
        if LEAF_HEADER_SIZE + (leaf_max_size + 1) * leaf_pair > PAGE_SIZE {
            return Err(BTreeError::InvalidCapacity(format!(
                "leaf max size {} does not fit a page",
                leaf_max_size
            )));
        }
        if INTERNAL_HEADER_SIZE + (internal_max_size + 1) * internal_pair > PAGE_SIZE {
            return Err(BTreeError::InvalidCapacity(format!(
                "internal max size {} does not fit a page",
                internal_max_size
            )));
        }

        let (header_page_id, basic) = bpm.new_page_guarded()?;
        {
            let mut header = basic.upgrade_write();
            set_header_root(header.data_mut(), INVALID_PAGE_ID);
        }

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Current root page id; the invalid sentinel for an uninitialized tree
    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(header_root(guard.data()))
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        let root = self.root_page_id()?;
        if root == INVALID_PAGE_ID {
            return Ok(true);
        }
        let guard = self.bpm.fetch_page_read(root)?;
        Ok(node_kind(guard.data()) == Some(NodeKind::Leaf) && node_size(guard.data()) == 0)
    }

    /// Point lookup. Descends with read-latch crabbing: the child's latch
    /// is taken before the parent's is released.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let mut cur = header_root(guard.data());
        if cur == INVALID_PAGE_ID {
            return Ok(None);
        }

        loop {
            let child = self.bpm.fetch_page_read(cur)?;
            guard = child;
            match node_kind(guard.data()).ok_or(BTreeError::CorruptPage(cur))? {
                NodeKind::Leaf => {
                    let leaf = LeafPage::<K>::new(guard.data());
                    let pos = leaf.lower_bound(key);
                    if pos < leaf.size() && leaf.key_at(pos) == *key {
                        return Ok(Some(leaf.rid_at(pos)));
                    }
                    return Ok(None);
                }
                NodeKind::Internal => {
                    let node = InternalPage::<K>::new(guard.data());
                    cur = node.child_at(node.child_search(key));
                }
            }
        }
    }

    /// Insert a key/rid pair. Returns false if the key already exists.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let mut root_id = header_root(header.data());
        if root_id == INVALID_PAGE_ID {
            let (new_root_id, basic) = self.bpm.new_page_guarded()?;
            let mut root_guard = basic.upgrade_write();
            LeafPageMut::<K>::init(root_guard.data_mut(), self.leaf_max_size);
            set_header_root(header.data_mut(), new_root_id);
            root_id = new_root_id;
        }

        let mut ctx = Context {
            header: Some(header),
            root_page_id: root_id,
            path: Vec::new(),
        };

        // Descend, keeping only the suffix of nodes that might split
        let mut cur = root_id;
        loop {
            let guard = self.bpm.fetch_page_write(cur)?;
            let kind = node_kind(guard.data()).ok_or(BTreeError::CorruptPage(cur))?;
            if node_size(guard.data()) < node_max_size(guard.data()) {
                // Safe: this node absorbs any split below it
                ctx.header = None;
                ctx.path.clear();
            }
            match kind {
                NodeKind::Leaf => {
                    ctx.path.push(guard);
                    break;
                }
                NodeKind::Internal => {
                    let node = InternalPage::<K>::new(guard.data());
                    cur = node.child_at(node.child_search(key));
                    ctx.path.push(guard);
                }
            }
        }

        // Insert into the leaf at its sorted position
        {
            let leaf_guard = ctx.path.last_mut().expect("descent reached a leaf");
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            let pos = leaf.as_view().lower_bound(key);
            if pos < leaf.size() && leaf.as_view().key_at(pos) == *key {
                return Ok(false);
            }
            leaf.insert_at(pos, key, rid);
        }

        // Split overflowing nodes bottom-up
        let mut cur_guard = ctx.path.pop().expect("descent reached a leaf");
        loop {
            if node_size(cur_guard.data()) <= node_max_size(cur_guard.data()) {
                break;
            }

            let kind = node_kind(cur_guard.data())
                .ok_or_else(|| BTreeError::CorruptPage(cur_guard.page_id()))?;
            let (new_page_id, new_basic) = self.bpm.new_page_guarded()?;
            let mut new_guard = new_basic.upgrade_write();
            let promoted = match kind {
                NodeKind::Leaf => {
                    let mut cur_leaf = LeafPageMut::<K>::new(cur_guard.data_mut());
                    let mut new_leaf =
                        LeafPageMut::<K>::init(new_guard.data_mut(), self.leaf_max_size);
                    cur_leaf.split_into(&mut new_leaf, new_page_id)
                }
                NodeKind::Internal => {
                    let mut cur_node = InternalPageMut::<K>::new(cur_guard.data_mut());
                    let mut new_node =
                        InternalPageMut::<K>::init(new_guard.data_mut(), self.internal_max_size);
                    cur_node.split_into(&mut new_node)
                }
            };
            drop(new_guard);

            if cur_guard.page_id() == ctx.root_page_id {
                // The root split: grow the tree by one level
                let (new_root_id, basic) = self.bpm.new_page_guarded()?;
                let mut root_guard = basic.upgrade_write();
                let mut root =
                    InternalPageMut::<K>::init(root_guard.data_mut(), self.internal_max_size);
                root.set_size(2);
                root.set_child_at(0, cur_guard.page_id());
                root.set_key_at(1, &promoted);
                root.set_child_at(1, new_page_id);

                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("header retained while the root may split");
                set_header_root(header_guard.data_mut(), new_root_id);
                break;
            }

            let parent_guard = ctx
                .path
                .last_mut()
                .expect("non-root split has its parent on the path");
            {
                let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
                let pos = parent.as_view().child_search(&promoted) + 1;
                parent.insert_pair_at(pos, &promoted, new_page_id);
            }
            cur_guard = ctx.path.pop().expect("parent is on the path");
        }

        Ok(true)
    }

    /// Remove a key; absent keys are a no-op
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = header_root(header.data());
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut ctx = Context {
            header: Some(header),
            root_page_id: root_id,
            path: Vec::new(),
        };

        // Descend, keeping only the suffix of nodes that might underflow
        let mut cur = root_id;
        loop {
            let guard = self.bpm.fetch_page_write(cur)?;
            let kind = node_kind(guard.data()).ok_or(BTreeError::CorruptPage(cur))?;
            if node_size(guard.data()) > node_min_size(guard.data()) {
                ctx.header = None;
                ctx.path.clear();
            }
            match kind {
                NodeKind::Leaf => {
                    ctx.path.push(guard);
                    break;
                }
                NodeKind::Internal => {
                    let node = InternalPage::<K>::new(guard.data());
                    cur = node.child_at(node.child_search(key));
                    ctx.path.push(guard);
                }
            }
        }

        // Delete from the leaf
        {
            let leaf_guard = ctx.path.last_mut().expect("descent reached a leaf");
            let mut leaf = LeafPageMut::<K>::new(leaf_guard.data_mut());
            let pos = leaf.as_view().lower_bound(key);
            if pos >= leaf.size() || leaf.as_view().key_at(pos) != *key {
                return Ok(());
            }
            leaf.remove_at(pos);
        }

        // Rebalance bottom-up: redistribute if a sibling can spare an
        // entry, otherwise merge
        let mut cur_guard = ctx.path.pop().expect("descent reached a leaf");
        loop {
            let kind = node_kind(cur_guard.data())
                .ok_or_else(|| BTreeError::CorruptPage(cur_guard.page_id()))?;

            if cur_guard.page_id() == ctx.root_page_id {
                // An internal root with a single child is replaced by it
                if kind == NodeKind::Internal && node_size(cur_guard.data()) == 1 {
                    let child = InternalPage::<K>::new(cur_guard.data()).child_at(0);
                    let header_guard = ctx
                        .header
                        .as_mut()
                        .expect("header retained while the root may shrink");
                    set_header_root(header_guard.data_mut(), child);
                    let old_root = cur_guard.page_id();
                    drop(cur_guard);
                    self.bpm.delete_page(old_root)?;
                }
                break;
            }

            if node_size(cur_guard.data()) >= node_min_size(cur_guard.data()) {
                break;
            }

            let parent_guard = ctx
                .path
                .last_mut()
                .expect("non-root underflow has its parent on the path");
            let child_pos = InternalPage::<K>::new(parent_guard.data())
                .position_of_child(cur_guard.page_id())
                .expect("page is linked in its parent");
            let parent_size = node_size(parent_guard.data());

            // Try the left sibling first
            if child_pos > 0 {
                let left_id = InternalPage::<K>::new(parent_guard.data()).child_at(child_pos - 1);
                let mut left_guard = self.bpm.fetch_page_write(left_id)?;
                if node_size(left_guard.data()) > node_min_size(left_guard.data()) {
                    match kind {
                        NodeKind::Leaf => {
                            let (stolen_key, stolen_rid) = {
                                let mut left = LeafPageMut::<K>::new(left_guard.data_mut());
                                let last = left.size() - 1;
                                let k = left.as_view().key_at(last);
                                let r = left.as_view().rid_at(last);
                                left.remove_at(last);
                                (k, r)
                            };
                            LeafPageMut::<K>::new(cur_guard.data_mut())
                                .insert_at(0, &stolen_key, stolen_rid);
                            InternalPageMut::<K>::new(parent_guard.data_mut())
                                .set_key_at(child_pos, &stolen_key);
                        }
                        NodeKind::Internal => {
                            let old_sep =
                                InternalPage::<K>::new(parent_guard.data()).key_at(child_pos);
                            let (stolen_key, stolen_child) =
                                InternalPageMut::<K>::new(left_guard.data_mut()).pop_back();
                            {
                                let mut cur_node = InternalPageMut::<K>::new(cur_guard.data_mut());
                                cur_node.insert_pair_front(&stolen_key, stolen_child);
                                cur_node.set_key_at(1, &old_sep);
                            }
                            InternalPageMut::<K>::new(parent_guard.data_mut())
                                .set_key_at(child_pos, &stolen_key);
                        }
                    }
                    break;
                }
            }

            // Then the right sibling
            if child_pos + 1 < parent_size {
                let right_id = InternalPage::<K>::new(parent_guard.data()).child_at(child_pos + 1);
                let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                if node_size(right_guard.data()) > node_min_size(right_guard.data()) {
                    match kind {
                        NodeKind::Leaf => {
                            let (stolen_key, stolen_rid, new_sep) = {
                                let mut right = LeafPageMut::<K>::new(right_guard.data_mut());
                                let k = right.as_view().key_at(0);
                                let r = right.as_view().rid_at(0);
                                right.remove_at(0);
                                (k, r, right.as_view().key_at(0))
                            };
                            {
                                let mut cur_leaf = LeafPageMut::<K>::new(cur_guard.data_mut());
                                let end = cur_leaf.size();
                                cur_leaf.insert_at(end, &stolen_key, stolen_rid);
                            }
                            InternalPageMut::<K>::new(parent_guard.data_mut())
                                .set_key_at(child_pos + 1, &new_sep);
                        }
                        NodeKind::Internal => {
                            let old_sep =
                                InternalPage::<K>::new(parent_guard.data()).key_at(child_pos + 1);
                            let (stolen_child, new_sep) = {
                                let mut right = InternalPageMut::<K>::new(right_guard.data_mut());
                                let child = right.as_view().child_at(0);
                                let sep = right.as_view().key_at(1);
                                right.remove_pair_at(0);
                                (child, sep)
                            };
                            {
                                let mut cur_node = InternalPageMut::<K>::new(cur_guard.data_mut());
                                let end = cur_node.size();
                                cur_node.insert_pair_at(end, &old_sep, stolen_child);
                            }
                            InternalPageMut::<K>::new(parent_guard.data_mut())
                                .set_key_at(child_pos + 1, &new_sep);
                        }
                    }
                    break;
                }
            }

            // No sibling can lend: merge, preferring the left sibling
            if child_pos > 0 {
                let left_id = InternalPage::<K>::new(parent_guard.data()).child_at(child_pos - 1);
                let mut left_guard = self.bpm.fetch_page_write(left_id)?;
                match kind {
                    NodeKind::Leaf => {
                        let cur_view = LeafPage::<K>::new(cur_guard.data());
                        LeafPageMut::<K>::new(left_guard.data_mut()).merge_from(&cur_view);
                    }
                    NodeKind::Internal => {
                        let junction =
                            InternalPage::<K>::new(parent_guard.data()).key_at(child_pos);
                        let cur_view = InternalPage::<K>::new(cur_guard.data());
                        InternalPageMut::<K>::new(left_guard.data_mut())
                            .merge_from(&cur_view, &junction);
                    }
                }
                InternalPageMut::<K>::new(parent_guard.data_mut()).remove_pair_at(child_pos);
                let cur_id = cur_guard.page_id();
                drop(left_guard);
                drop(cur_guard);
                self.bpm.delete_page(cur_id)?;
            } else {
                let right_id = InternalPage::<K>::new(parent_guard.data()).child_at(1);
                let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                match kind {
                    NodeKind::Leaf => {
                        let right_view = LeafPage::<K>::new(right_guard.data());
                        LeafPageMut::<K>::new(cur_guard.data_mut()).merge_from(&right_view);
                    }
                    NodeKind::Internal => {
                        let junction = InternalPage::<K>::new(parent_guard.data()).key_at(1);
                        let right_view = InternalPage::<K>::new(right_guard.data());
                        InternalPageMut::<K>::new(cur_guard.data_mut())
                            .merge_from(&right_view, &junction);
                    }
                }
                InternalPageMut::<K>::new(parent_guard.data_mut()).remove_pair_at(1);
                drop(right_guard);
                self.bpm.delete_page(right_id)?;
                drop(cur_guard);
            }

            cur_guard = ctx.path.pop().expect("parent is on the path");
        }

        Ok(())
    }

    /// Iterator over the whole tree in key order
    pub fn iter(&self) -> Result<TreeIterator<'_, K>, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let mut cur = header_root(guard.data());
        if cur == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(&self.bpm));
        }
        loop {
            let child = self.bpm.fetch_page_read(cur)?;
            guard = child;
            match node_kind(guard.data()).ok_or(BTreeError::CorruptPage(cur))? {
                NodeKind::Leaf => return Ok(TreeIterator::new(&self.bpm, cur, 0)),
                NodeKind::Internal => {
                    cur = InternalPage::<K>::new(guard.data()).child_at(0);
                }
            }
        }
    }

    /// Iterator positioned at the first entry whose key is >= `key`
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K>, BTreeError> {
        let mut guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let mut cur = header_root(guard.data());
        if cur == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(&self.bpm));
        }
        loop {
            let child = self.bpm.fetch_page_read(cur)?;
            guard = child;
            match node_kind(guard.data()).ok_or(BTreeError::CorruptPage(cur))? {
                NodeKind::Leaf => {
                    let pos = LeafPage::<K>::new(guard.data()).lower_bound(key);
                    return Ok(TreeIterator::new(&self.bpm, cur, pos));
                }
                NodeKind::Internal => {
                    let node = InternalPage::<K>::new(guard.data());
                    cur = node.child_at(node.child_search(key));
                }
            }
        }
    }
}

/// Key-erased view of an index, used by transaction rollback to undo
/// entries without knowing the concrete key type
pub trait UntypedIndex: Send + Sync {
    fn insert_encoded(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError>;
    fn remove_encoded(&self, key: &[u8]) -> Result<(), BTreeError>;
}

impl<K: IndexKey> UntypedIndex for BPlusTree<K> {
    fn insert_encoded(&self, key: &[u8], rid: Rid) -> Result<bool, BTreeError> {
        self.insert(&K::decode(key), rid)
    }

    fn remove_encoded(&self, key: &[u8]) -> Result<(), BTreeError> {
        self.remove(&K::decode(key))
    }
}
