use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; negative values are reserved
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type; smaller IDs are older transactions
pub type TxnId = u32;

/// Record identifier: the page a tuple lives on plus its slot within the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub const INVALID: Rid = Rid {
        page_id: INVALID_PAGE_ID,
        slot_num: 0,
    };

    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

/// Page structure: a fixed-size byte array plus its on-disk identity.
/// Pin counts and dirty bits are frame metadata and live in the buffer pool.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the payload and drop the on-disk identity
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page; the RwLock is the page's reader/writer latch
pub type PagePtr = Arc<RwLock<Page>>;
