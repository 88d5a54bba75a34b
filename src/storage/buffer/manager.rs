use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, guarded by the pool latch
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// Everything the pool latch protects: the page table, the free list, the
/// frame metadata and the page-ID allocation cursor.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    meta: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// A single buffer pool instance: a fixed set of frames caching disk pages,
/// with LRU replacement among unpinned frames.
///
/// Every public operation holds the pool latch for its whole duration,
/// including the disk I/O it may trigger. The replacer latch nests inside.
/// When the instance is one shard of a parallel pool it allocates page IDs
/// striped by the instance count, so IDs route back to it.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<PagePtr>,
    replacer: LruReplacer,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Create a standalone buffer pool over a fresh disk manager
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_instance(pool_size, 1, 0, disk_manager))
    }

    /// Create one instance of a sharded pool over a shared disk manager.
    /// `instance_index` must be below `num_instances`.
    pub fn with_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            meta.push(FrameMeta::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            replacer: LruReplacer::new(pool_size),
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                meta,
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, pinning it. On a cache hit the page is withdrawn from
    /// the replacer and its pin count bumped; the dirty bit is left alone.
    /// On a miss a fresh frame is taken and the page read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            self.replacer.pin(frame_id);
            inner.meta[frame_id].pin_count += 1;
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self
            .find_fresh_frame(&mut inner)?
            .ok_or(BufferPoolError::NoFreeFrames)?;

        // Read before installing, so a failed read leaves the pool unchanged
        {
            let mut page = self.frames[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                drop(page);
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        inner.page_table.insert(page_id, frame_id);
        let meta = &mut inner.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        Ok(self.frames[frame_id].clone())
    }

    /// Create a brand-new zeroed page, pinned. Returns the page and its ID.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self
            .find_fresh_frame(&mut inner)?
            .ok_or(BufferPoolError::NoFreeFrames)?;

        let page_id = self.allocate_page(&mut inner);

        {
            let mut page = self.frames[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }

        inner.page_table.insert(page_id, frame_id);
        let meta = &mut inner.meta[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Drop one pin on a page. The dirty argument ORs into the frame's dirty
    /// bit and never clears it. At pin count zero the frame becomes an
    /// eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let meta = &mut inner.meta[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            meta.is_dirty = true;
        }

        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page through to disk and mark it clean
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }
        inner.meta[frame_id].is_dirty = false;

        Ok(())
    }

    /// Flush every resident page under a single latch acquisition
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_ids: Vec<FrameId> = inner.page_table.values().copied().collect();
        for frame_id in frame_ids {
            {
                let page = self.frames[frame_id].read();
                self.disk_manager.write_page(&page)?;
            }
            inner.meta[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Delete a page from the pool and deallocate its disk storage. Deleting
    /// a page that is not resident succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(());
            }
        };

        if inner.meta[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);

        let meta = &mut inner.meta[frame_id];
        meta.page_id = INVALID_PAGE_ID;
        meta.pin_count = 0;
        meta.is_dirty = false;
        self.frames[frame_id].write().reset();

        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Current pin count of a resident page
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| inner.meta[frame_id].pin_count)
    }

    /// Pick a frame for a new resident page: free list first, then an LRU
    /// victim. A dirty victim is written back before its frame is reused.
    fn find_fresh_frame(
        &self,
        inner: &mut MutexGuard<'_, PoolInner>,
    ) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let frame_id = match self.replacer.victim() {
            Some(id) => id,
            None => return Ok(None),
        };

        let old_page_id = inner.meta[frame_id].page_id;
        if inner.meta[frame_id].is_dirty {
            log::debug!("evicting dirty page {}, writing back", old_page_id);
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }

        inner.page_table.remove(&old_page_id);
        let meta = &mut inner.meta[frame_id];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;

        Ok(Some(frame_id))
    }

    /// Reserve the next page ID for this instance. IDs are striped so that
    /// `page_id % num_instances == instance_index`.
    fn allocate_page(&self, inner: &mut MutexGuard<'_, PoolInner>) -> PageId {
        let page_id = inner.next_page_id;
        inner.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );
        page_id
    }
}
