use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use parking_lot::RwLock;

use crate::common::types::{PageId, Rid};
use crate::index::hash::error::HashTableError;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::bucket_page::{HashBucketPage, HashKey, BUCKET_ARRAY_SIZE};
use crate::storage::page::directory_page::{HashDirectoryPage, MAX_GLOBAL_DEPTH};

/// Hash applied to keys before directory indexing
pub type HashFn = fn(HashKey) -> u32;

/// Default key hash: the standard hasher's 64-bit output downcast to the
/// 32 bits extendible hashing consumes
pub fn default_hash(key: HashKey) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as u32
}

/// Disk-backed extendible hash table.
///
/// The directory and bucket pages live in the buffer pool and are pinned for
/// the duration of each operation. One table-level reader/writer latch
/// serializes structural change: lookups take it shared, insert and remove
/// take it exclusive.
pub struct ExtendibleHashTable {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    bucket_capacity: usize,
    hash_fn: HashFn,
    table_latch: RwLock<()>,
}

impl ExtendibleHashTable {
    /// Create a table with full-size buckets and the default hash
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, HashTableError> {
        Self::with_hasher(buffer_pool, BUCKET_ARRAY_SIZE, default_hash)
    }

    /// Create a table with a chosen bucket capacity (clamped to the page's
    /// slot count) and hash function. Small capacities force early splits.
    pub fn with_hasher(
        buffer_pool: Arc<BufferPoolManager>,
        bucket_capacity: usize,
        hash_fn: HashFn,
    ) -> Result<Self, HashTableError> {
        let bucket_capacity = bucket_capacity.clamp(1, BUCKET_ARRAY_SIZE);

        let (dir_page, directory_page_id) = buffer_pool.new_page()?;

        // Two empty buckets at depth one. A zeroed page is a valid empty
        // bucket, so the bucket pages need no initialization write.
        let buckets = Self::new_bucket(&buffer_pool)
            .and_then(|b0| Self::new_bucket(&buffer_pool).map(|b1| (b0, b1)));
        let (bucket0_page_id, bucket1_page_id) = match buckets {
            Ok(ids) => ids,
            Err(e) => {
                let _ = buffer_pool.unpin_page(directory_page_id, false);
                return Err(e);
            }
        };

        let mut dir = HashDirectoryPage::new(directory_page_id);
        dir.incr_global_depth();
        dir.set_bucket_page_id(0, bucket0_page_id);
        dir.set_local_depth(0, 1);
        dir.set_bucket_page_id(1, bucket1_page_id);
        dir.set_local_depth(1, 1);
        dir.to_bytes(&mut dir_page.write().data);

        buffer_pool.unpin_page(directory_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id,
            bucket_capacity,
            hash_fn,
            table_latch: RwLock::new(()),
        })
    }

    fn new_bucket(buffer_pool: &BufferPoolManager) -> Result<PageId, HashTableError> {
        let (_page, page_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(page_id, false)?;
        Ok(page_id)
    }

    /// The page holding the directory, for external inspection
    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    /// Collect every record ID stored under the key
    pub fn get_value(&self, key: HashKey) -> Result<Vec<Rid>, HashTableError> {
        let _guard = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let dir = HashDirectoryPage::from_bytes(&dir_page.read().data);

        let bucket_page_id = dir.bucket_page_id(self.key_to_index(key, &dir));
        let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(page) => page,
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, false);
                return Err(e.into());
            }
        };
        let result = HashBucketPage::from_bytes(&bucket_page.read().data).get_value(key);

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(result)
    }

    /// Insert a key/record pair. Returns false when the exact pair is
    /// already present. Splits the target bucket (growing the directory as
    /// needed) until the pair fits.
    pub fn insert(&self, key: HashKey, rid: Rid) -> Result<bool, HashTableError> {
        let _guard = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir = HashDirectoryPage::from_bytes(&dir_page.read().data);
        let mut dir_dirty = false;

        let result = self.insert_inner(&mut dir, &mut dir_dirty, key, rid);

        // Completed split iterations are valid state; persist the directory
        // even when a later step failed.
        if dir_dirty {
            dir.to_bytes(&mut dir_page.write().data);
        }
        match result {
            Ok(inserted) => {
                self.buffer_pool.unpin_page(self.directory_page_id, dir_dirty)?;
                Ok(inserted)
            }
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, dir_dirty);
                Err(e)
            }
        }
    }

    fn insert_inner(
        &self,
        dir: &mut HashDirectoryPage,
        dir_dirty: &mut bool,
        key: HashKey,
        rid: Rid,
    ) -> Result<bool, HashTableError> {
        loop {
            let bucket_idx = self.key_to_index(key, dir);
            let bucket_page_id = dir.bucket_page_id(bucket_idx);
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut bucket = HashBucketPage::from_bytes(&bucket_page.read().data);

            if bucket.num_readable() < self.bucket_capacity && bucket.has_free_slot() {
                let inserted = bucket.insert(key, rid);
                if inserted {
                    bucket.to_bytes(&mut bucket_page.write().data);
                }
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                return Ok(inserted);
            }

            // The bucket has no room. A duplicate would never fit anywhere
            // else, so reject it before splitting.
            if bucket.get_value(key).contains(&rid) {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                return Ok(false);
            }

            // When the bucket already uses every global bit, the directory
            // has to double first.
            let old_depth = dir.local_depth(bucket_idx);
            if old_depth == dir.global_depth() {
                if dir.global_depth() == MAX_GLOBAL_DEPTH {
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    return Err(HashTableError::DirectoryFull);
                }
                dir.grow();
                *dir_dirty = true;
            }

            // Allocate the split image before mutating anything, so failure
            // leaves the table untouched.
            let (image_page, image_page_id) = match self.buffer_pool.new_page() {
                Ok(page) => page,
                Err(e) => {
                    let _ = self.buffer_pool.unpin_page(bucket_page_id, false);
                    return Err(e.into());
                }
            };

            let new_depth = old_depth + 1;
            let new_mask: u32 = (1 << new_depth) - 1;
            let image_idx = bucket_idx ^ (1 << old_depth);
            let image_high_bits = image_idx as u32 & new_mask;

            log::debug!(
                "splitting bucket page {} at depth {} into page {}",
                bucket_page_id,
                old_depth,
                image_page_id
            );

            // Deepen every slot referencing the split bucket and repoint the
            // image half at the new page.
            for idx in 0..dir.size() {
                if dir.bucket_page_id(idx) != bucket_page_id {
                    continue;
                }
                if (idx as u32 & new_mask) == image_high_bits {
                    dir.set_bucket_page_id(idx, image_page_id);
                }
                dir.set_local_depth(idx, new_depth);
            }
            *dir_dirty = true;

            // Partition the live entries by their new depth bit. Both sides
            // come out compacted; tombstones do not survive a split.
            let mut stay = HashBucketPage::new();
            let mut image = HashBucketPage::new();
            for slot in 0..BUCKET_ARRAY_SIZE {
                if !bucket.is_occupied(slot) {
                    break;
                }
                if !bucket.is_readable(slot) {
                    continue;
                }
                let (k, v) = (bucket.key_at(slot), bucket.value_at(slot));
                if ((self.hash_fn)(k) & new_mask) == image_high_bits {
                    image.insert(k, v);
                } else {
                    stay.insert(k, v);
                }
            }

            stay.to_bytes(&mut bucket_page.write().data);
            image.to_bytes(&mut image_page.write().data);
            self.buffer_pool.unpin_page(bucket_page_id, true)?;
            self.buffer_pool.unpin_page(image_page_id, true)?;
            // retry against the updated directory
        }
    }

    /// Remove a key/record pair. An emptied bucket is merged with its split
    /// image and the directory shrunk while possible.
    pub fn remove(&self, key: HashKey, rid: Rid) -> Result<bool, HashTableError> {
        let _guard = self.table_latch.write();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let mut dir = HashDirectoryPage::from_bytes(&dir_page.read().data);
        let mut dir_dirty = false;

        let result = self.remove_inner(&mut dir, &mut dir_dirty, key, rid);

        if dir_dirty {
            dir.to_bytes(&mut dir_page.write().data);
        }
        match result {
            Ok(removed) => {
                self.buffer_pool.unpin_page(self.directory_page_id, dir_dirty)?;
                Ok(removed)
            }
            Err(e) => {
                let _ = self.buffer_pool.unpin_page(self.directory_page_id, dir_dirty);
                Err(e)
            }
        }
    }

    fn remove_inner(
        &self,
        dir: &mut HashDirectoryPage,
        dir_dirty: &mut bool,
        key: HashKey,
        rid: Rid,
    ) -> Result<bool, HashTableError> {
        let bucket_idx = self.key_to_index(key, dir);
        let bucket_page_id = dir.bucket_page_id(bucket_idx);
        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let mut bucket = HashBucketPage::from_bytes(&bucket_page.read().data);

        let removed = bucket.remove(key, rid);
        if removed {
            bucket.to_bytes(&mut bucket_page.write().data);
        }
        self.buffer_pool.unpin_page(bucket_page_id, removed)?;

        if removed && bucket.is_empty() {
            self.merge(dir, dir_dirty)?;
        }

        Ok(removed)
    }

    /// Fold empty buckets into their split images. Passes repeat until one
    /// changes nothing; after each pass the directory shrinks while no slot
    /// needs its top bit.
    fn merge(
        &self,
        dir: &mut HashDirectoryPage,
        dir_dirty: &mut bool,
    ) -> Result<(), HashTableError> {
        loop {
            let mut changed = false;

            for idx in 0..dir.size() {
                if dir.local_depth(idx) == 0 {
                    continue;
                }
                let image_idx = dir.split_image_index(idx);
                if dir.local_depth(image_idx) != dir.local_depth(idx) {
                    continue;
                }
                let bucket_page_id = dir.bucket_page_id(idx);
                let image_page_id = dir.bucket_page_id(image_idx);
                if bucket_page_id == image_page_id {
                    continue;
                }

                let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
                let empty = HashBucketPage::from_bytes(&bucket_page.read().data).is_empty();
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                if !empty {
                    continue;
                }

                let new_depth = dir.local_depth(idx) - 1;
                for j in 0..dir.size() {
                    let page_id = dir.bucket_page_id(j);
                    if page_id == bucket_page_id || page_id == image_page_id {
                        dir.set_bucket_page_id(j, image_page_id);
                        dir.set_local_depth(j, new_depth);
                    }
                }
                *dir_dirty = true;
                changed = true;

                log::debug!(
                    "merged empty bucket page {} into page {}",
                    bucket_page_id,
                    image_page_id
                );
                // no slot references the emptied page anymore
                let _ = self.buffer_pool.delete_page(bucket_page_id);
            }

            while dir.can_shrink() {
                dir.shrink();
                *dir_dirty = true;
                changed = true;
            }

            if !changed {
                return Ok(());
            }
        }
    }

    /// Current global depth of the directory
    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _guard = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = HashDirectoryPage::from_bytes(&dir_page.read().data).global_depth();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(depth)
    }

    /// Check the directory's structural invariants; panics on violation
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _guard = self.table_latch.read();

        let dir_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let dir = HashDirectoryPage::from_bytes(&dir_page.read().data);
        dir.verify_integrity();
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(())
    }

    fn key_to_index(&self, key: HashKey, dir: &HashDirectoryPage) -> usize {
        ((self.hash_fn)(key) & dir.global_depth_mask()) as usize
    }
}
