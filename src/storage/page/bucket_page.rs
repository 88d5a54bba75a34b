use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid, PAGE_SIZE};

/// Key type stored by the hash index
pub type HashKey = i32;

/// Bytes per stored entry: a 4-byte key and an 8-byte record ID
pub const BUCKET_ENTRY_SIZE: usize = 12;

/// Entries per bucket page. Each entry costs its own bytes plus two bitmap
/// bits, hence `4 * PAGE_SIZE / (4 * entry + 1)`.
pub const BUCKET_ARRAY_SIZE: usize = 4 * PAGE_SIZE / (4 * BUCKET_ENTRY_SIZE + 1);

const BITMAP_BYTES: usize = (BUCKET_ARRAY_SIZE + 7) / 8;
const OCCUPIED_OFFSET: usize = 0;
const READABLE_OFFSET: usize = BITMAP_BYTES;
const ENTRIES_OFFSET: usize = 2 * BITMAP_BYTES;

/// Bucket page of the extendible hash index.
///
/// Slots carry two bits: `occupied` is set the first time a slot is used and
/// never cleared while the page lives, `readable` marks the slot as holding a
/// live entry. Removal only clears `readable` (a tombstone), so scans can
/// stop at the first unoccupied slot.
pub struct HashBucketPage {
    occupied: [u8; BITMAP_BYTES],
    readable: [u8; BITMAP_BYTES],
    keys: [HashKey; BUCKET_ARRAY_SIZE],
    rids: [Rid; BUCKET_ARRAY_SIZE],
}

impl Default for HashBucketPage {
    fn default() -> Self {
        Self::new()
    }
}

impl HashBucketPage {
    pub fn new() -> Self {
        Self {
            occupied: [0; BITMAP_BYTES],
            readable: [0; BITMAP_BYTES],
            keys: [0; BUCKET_ARRAY_SIZE],
            rids: [Rid::INVALID; BUCKET_ARRAY_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bucket = Self::new();
        bucket
            .occupied
            .copy_from_slice(&bytes[OCCUPIED_OFFSET..OCCUPIED_OFFSET + BITMAP_BYTES]);
        bucket
            .readable
            .copy_from_slice(&bytes[READABLE_OFFSET..READABLE_OFFSET + BITMAP_BYTES]);

        for i in 0..BUCKET_ARRAY_SIZE {
            if !bucket.is_occupied(i) {
                break;
            }
            let at = ENTRIES_OFFSET + i * BUCKET_ENTRY_SIZE;
            bucket.keys[i] = LittleEndian::read_i32(&bytes[at..at + 4]);
            bucket.rids[i] = Rid::new(
                LittleEndian::read_i32(&bytes[at + 4..at + 8]) as PageId,
                LittleEndian::read_u32(&bytes[at + 8..at + 12]),
            );
        }

        bucket
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        debug_assert!(bytes.len() >= PAGE_SIZE);

        bytes[OCCUPIED_OFFSET..OCCUPIED_OFFSET + BITMAP_BYTES].copy_from_slice(&self.occupied);
        bytes[READABLE_OFFSET..READABLE_OFFSET + BITMAP_BYTES].copy_from_slice(&self.readable);

        for i in 0..BUCKET_ARRAY_SIZE {
            if !self.is_occupied(i) {
                break;
            }
            let at = ENTRIES_OFFSET + i * BUCKET_ENTRY_SIZE;
            LittleEndian::write_i32(&mut bytes[at..at + 4], self.keys[i]);
            LittleEndian::write_i32(&mut bytes[at + 4..at + 8], self.rids[i].page_id);
            LittleEndian::write_u32(&mut bytes[at + 8..at + 12], self.rids[i].slot_num);
        }
    }

    /// Insert an entry into the first unoccupied slot. Fails on an exact
    /// duplicate or when no unoccupied slot remains.
    pub fn insert(&mut self, key: HashKey, rid: Rid) -> bool {
        let mut slot = BUCKET_ARRAY_SIZE;
        for i in 0..BUCKET_ARRAY_SIZE {
            if !self.is_occupied(i) {
                slot = i;
                break;
            }
            if self.is_readable(i) && self.keys[i] == key && self.rids[i] == rid {
                return false;
            }
        }
        if slot == BUCKET_ARRAY_SIZE {
            return false;
        }

        self.keys[slot] = key;
        self.rids[slot] = rid;
        set_bit(&mut self.occupied, slot);
        set_bit(&mut self.readable, slot);
        true
    }

    /// Remove the matching entry, leaving a tombstone
    pub fn remove(&mut self, key: HashKey, rid: Rid) -> bool {
        for i in 0..BUCKET_ARRAY_SIZE {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.keys[i] == key && self.rids[i] == rid {
                clear_bit(&mut self.readable, i);
                return true;
            }
        }
        false
    }

    /// Collect every live record ID stored under the key
    pub fn get_value(&self, key: HashKey) -> Vec<Rid> {
        let mut result = Vec::new();
        for i in 0..BUCKET_ARRAY_SIZE {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.keys[i] == key {
                result.push(self.rids[i]);
            }
        }
        result
    }

    pub fn key_at(&self, slot: usize) -> HashKey {
        self.keys[slot]
    }

    pub fn value_at(&self, slot: usize) -> Rid {
        self.rids[slot]
    }

    /// Tombstone a slot directly
    pub fn remove_at(&mut self, slot: usize) {
        clear_bit(&mut self.readable, slot);
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        get_bit(&self.occupied, slot)
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        get_bit(&self.readable, slot)
    }

    pub fn num_readable(&self) -> usize {
        let mut count = 0;
        for i in 0..BUCKET_ARRAY_SIZE {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) {
                count += 1;
            }
        }
        count
    }

    /// Slots ever used; they form a prefix of the array
    pub fn num_occupied(&self) -> usize {
        (0..BUCKET_ARRAY_SIZE)
            .take_while(|&i| self.is_occupied(i))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == BUCKET_ARRAY_SIZE
    }

    /// Whether an insert could still claim a slot
    pub fn has_free_slot(&self) -> bool {
        self.num_occupied() < BUCKET_ARRAY_SIZE
    }
}

fn get_bit(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] >> (index % 8) & 1 == 1
}

fn set_bit(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] |= 1 << (index % 8);
}

fn clear_bit(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] &= !(1 << (index % 8));
}
