use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::disk::DiskManager;

/// A buffer pool sharded over several independent instances.
///
/// Pages route to the instance at `page_id % num_instances`; because each
/// instance allocates page IDs striped by the instance count, pages it
/// creates route back to it. Sharding splits the pool latch so unrelated
/// pages stop contending.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    next_instance: AtomicUsize,
}

impl ParallelBufferPoolManager {
    /// Create `num_instances` pools of `pool_size` frames each, sharing one
    /// disk manager over the given database file.
    pub fn new(
        num_instances: u32,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let instances = (0..num_instances)
            .map(|index| {
                Arc::new(BufferPoolManager::with_instance(
                    pool_size,
                    num_instances,
                    index,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: AtomicUsize::new(0),
        })
    }

    /// Total frame count across all instances
    pub fn size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        let index = page_id.rem_euclid(self.instances.len() as PageId) as usize;
        &self.instances[index]
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Create a new page on some instance. Starting from a rotating cursor,
    /// each instance gets one try; the cursor advances by one per call so
    /// allocations spread across the shards.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let start = self.next_instance.fetch_add(1, Ordering::Relaxed);

        for offset in 0..self.instances.len() {
            let instance = &self.instances[(start + offset) % self.instances.len()];
            match instance.new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::NoFreeFrames) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::NoFreeFrames)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.instance_for(page_id).pin_count(page_id)
    }
}
