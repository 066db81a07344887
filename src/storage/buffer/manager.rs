use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// A buffer pool frame: one slot that can hold a single page. Pin count and
/// dirty flag are pool metadata and live under the pool latch; the page's
/// own RwLock is the page latch.
struct Frame {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Buffer pool manager: maps page ids to frames, tracks pins, flushes dirty
/// pages and delegates victim selection to the LRU-K replacer.
///
/// One coarse mutex guards all pool metadata. The pool latch is never held
/// while latching a page another thread could hold: the only page latches
/// taken under the pool latch are on unpinned frames, which no guard can be
/// holding.
pub struct BufferPoolManager {
    pool_size: usize,
    disk_manager: Arc<DiskManager>,
    replacer: LruKReplacer,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame {
                page: Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))),
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i);
        }

        Self {
            pool_size,
            disk_manager,
            replacer: LruKReplacer::new(pool_size, replacer_k),
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: 1, // page ids start at 1; 0 is the invalid sentinel
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it. Fails with `PoolExhausted` only
    /// when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        let frame = &mut inner.frames[frame_id];
        {
            // The frame is unpinned, so no guard can be latching this page.
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page_ptr = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((page_id, page_ptr))
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let page_ptr = frame.page.clone();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(page_ptr);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            self.disk_manager.read_page(page_id, &mut page)?;
        }
        frame.pin_count = 1;
        frame.is_dirty = false;
        let page_ptr = frame.page.clone();

        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(page_ptr)
    }

    /// Drop one pin on a page, OR-merging the dirty flag. When the pin
    /// count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write a resident page back to disk and clear its dirty flag. The
    /// page does not need to be unpinned.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        // Clone the page handle and release the pool latch before latching
        // the page: a pinned page may be write-latched by another thread.
        let (frame_id, page_ptr) = {
            let inner = self.inner.lock();
            match inner.page_table.get(&page_id) {
                Some(&id) => (id, inner.frames[id].page.clone()),
                None => return Err(BufferPoolError::PageNotFound(page_id)),
            }
        };

        {
            let page = page_ptr.read();
            self.disk_manager.write_page(&page)?;
        }

        let mut inner = self.inner.lock();
        if inner.page_table.get(&page_id) == Some(&frame_id) {
            inner.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Flush every resident dirty page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let dirty_pages: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .page_table
                .iter()
                .filter(|(_, &frame_id)| inner.frames[frame_id].is_dirty)
                .map(|(&page_id, _)| page_id)
                .collect()
        };

        for page_id in dirty_pages {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted (and thereby flushed) between the scan and now
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Remove a page from the pool and return its frame to the free list.
    /// Fails if the page is pinned; succeeds trivially if not resident.
    /// Dirty bytes of a deleted page are discarded.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        let frame = &mut inner.frames[frame_id];
        frame.page.write().reset();
        frame.pin_count = 0;
        frame.is_dirty = false;
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Fetch a page wrapped in a pin-only guard
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<PageGuard<'_>, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self, page_id, page))
    }

    /// Fetch a page and take its shared latch before returning
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetch a page and take its exclusive latch before returning
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Allocate a fresh page wrapped in a pin-only guard
    pub fn new_page_guarded(&self) -> Result<(PageId, PageGuard<'_>), BufferPoolError> {
        let (page_id, page) = self.new_page()?;
        Ok((page_id, PageGuard::new(self, page_id, page)))
    }

    /// Obtain a frame: prefer the free list, otherwise evict. A dirty
    /// victim is written back before its frame is repurposed.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = match self.replacer.evict() {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let victim_page_id;
        {
            let frame = &inner.frames[victim];
            // The victim is unpinned, so nobody holds its latch.
            let page = frame.page.read();
            victim_page_id = page.page_id;
            if frame.is_dirty {
                debug!("evicting dirty page {}, writing back", victim_page_id);
                self.disk_manager.write_page(&page)?;
            }
        }
        inner.frames[victim].is_dirty = false;
        if victim_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&victim_page_id);
        }

        Ok(victim)
    }

    /// Guard teardown path; errors here mean a guard outlived its pool
    /// bookkeeping, which we can only report.
    pub(crate) fn unpin_for_guard(&self, page_id: PageId, is_dirty: bool) {
        if let Err(e) = self.unpin_page(page_id, is_dirty) {
            warn!("guard unpin of page {} failed: {}", page_id, e);
        }
    }
}
