use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, PagePtr, PAGE_SIZE};
use crate::storage::buffer::manager::BufferPoolManager;

/// Pin-only guard over a buffer pool page. Dropping it releases the pin,
/// with the dirty flag the caller accumulated through `mark_dirty`.
///
/// Guards move but never copy; a moved-from guard no longer exists, so the
/// pin is released exactly once on every exit path.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page: PagePtr,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, page: PagePtr) -> Self {
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The underlying page handle, for callers that latch on their own
    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    /// Record that the caller modified the page; folded into the unpin
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Take the page's shared latch, consuming this guard
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let latch = self.page.read_arc();
        ReadPageGuard {
            latch: Some(latch),
            guard: self,
        }
    }

    /// Take the page's exclusive latch, consuming this guard
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let latch = self.page.write_arc();
        WritePageGuard {
            latch: Some(latch),
            guard: self,
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_for_guard(self.page_id, self.is_dirty);
    }
}

/// Guard holding a pin plus the page's shared latch. The latch is released
/// before the pin on drop.
pub struct ReadPageGuard<'a> {
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
    guard: PageGuard<'a>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch.as_ref().expect("latch held until drop").data
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Release the latch first; the inner guard then drops the pin.
        self.latch.take();
    }
}

/// Guard holding a pin plus the page's exclusive latch. Mutable access
/// marks the page dirty.
pub struct WritePageGuard<'a> {
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    guard: PageGuard<'a>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch.as_ref().expect("latch held until drop").data
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.guard.mark_dirty();
        &mut self.latch.as_mut().expect("latch held until drop").data
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
    }
}
