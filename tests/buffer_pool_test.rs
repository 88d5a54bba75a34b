use anyhow::Result;

use taigadb::common::types::PAGE_SIZE;
use taigadb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    assert!(page_id >= 0);

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert_eq!(buffer_pool.pin_count(page_id), Some(1));
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_page_modification() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_pool_exhaustion_and_clean_eviction() -> Result<()> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(3)?;

    let (_, a) = buffer_pool.new_page()?;
    let (_, b) = buffer_pool.new_page()?;
    let (_, c) = buffer_pool.new_page()?;

    // Every frame is pinned, so the next allocation has no victim
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::NoFreeFrames)
    ));

    // Unpinning one clean page frees exactly one frame
    buffer_pool.unpin_page(a, false)?;
    let (_, d) = buffer_pool.new_page()?;
    assert!(d >= 0);

    // The clean victim was dropped without a disk write
    assert_eq!(temp_file.as_file().metadata()?.len(), 0);

    // The evicted page is gone from the pool; the pinned ones remain
    assert_eq!(buffer_pool.pin_count(a), None);
    assert_eq!(buffer_pool.pin_count(b), Some(1));
    assert_eq!(buffer_pool.pin_count(c), Some(1));

    Ok(())
}

#[test]
fn test_dirty_eviction_writes_back() -> Result<()> {
    let (buffer_pool, temp_file) = create_test_buffer_pool(1)?;

    let (page, a) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0..4].copy_from_slice(b"AAAA");
    }
    buffer_pool.unpin_page(a, true)?;

    // Allocating with a one-frame pool must evict A, writing it first
    let (_, b) = buffer_pool.new_page()?;
    assert!(temp_file.as_file().metadata()?.len() >= PAGE_SIZE as u64);
    buffer_pool.unpin_page(b, false)?;

    // The written-back bytes come back on refetch
    let fetched = buffer_pool.fetch_page(a)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[0..4], b"AAAA");
    }
    buffer_pool.unpin_page(a, false)?;

    Ok(())
}

#[test]
fn test_pin_unpin_balance() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (_, a) = buffer_pool.new_page()?;
    let _second_handle = buffer_pool.fetch_page(a)?;
    assert_eq!(buffer_pool.pin_count(a), Some(2));

    // One unpin is not enough to make the frame evictable
    buffer_pool.unpin_page(a, false)?;
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::NoFreeFrames)
    ));

    // The matching second unpin is
    buffer_pool.unpin_page(a, false)?;
    let (_, b) = buffer_pool.new_page()?;
    assert!(b >= 0);

    Ok(())
}

#[test]
fn test_unpin_errors() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    assert!(matches!(
        buffer_pool.unpin_page(42, false),
        Err(BufferPoolError::PageNotFound(42))
    ));

    let (_, a) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(a, false)?;
    assert!(matches!(
        buffer_pool.unpin_page(a, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));

    Ok(())
}

#[test]
fn test_dirty_flag_is_sticky() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (page, a) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[7] = 0x5A;
    }
    buffer_pool.unpin_page(a, true)?;

    // A later clean unpin must not wash out the dirty bit
    let _handle = buffer_pool.fetch_page(a)?;
    buffer_pool.unpin_page(a, false)?;

    // Evict A by exhausting the other frames; the write-back must happen
    let (_, b) = buffer_pool.new_page()?;
    let (_, c) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(b, false)?;
    buffer_pool.unpin_page(c, false)?;

    let fetched = buffer_pool.fetch_page(a)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.data[7], 0x5A);
    }
    buffer_pool.unpin_page(a, false)?;

    Ok(())
}

#[test]
fn test_flush_then_fetch_is_bit_identical() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (page, a) = buffer_pool.new_page()?;
    let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i * 31 % 251) as u8).collect();
    {
        let mut page_guard = page.write();
        page_guard.data.copy_from_slice(&pattern);
    }
    buffer_pool.flush_page(a)?;
    buffer_pool.unpin_page(a, false)?;

    // Push A out of the pool so the next fetch reads from disk
    let (_, b) = buffer_pool.new_page()?;
    let (_, c) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(b, false)?;
    buffer_pool.unpin_page(c, false)?;

    let fetched = buffer_pool.fetch_page(a)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[..], &pattern[..]);
    }
    buffer_pool.unpin_page(a, false)?;

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(8)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0] = i;
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched.read();
            assert_eq!(page_guard.data[0], i as u8);
        }
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    // Deleting a pinned page fails
    let (_, a) = buffer_pool.new_page()?;
    assert!(matches!(
        buffer_pool.delete_page(a),
        Err(BufferPoolError::PagePinned(_))
    ));

    // Deleting after unpinning succeeds and frees the frame
    buffer_pool.unpin_page(a, false)?;
    buffer_pool.delete_page(a)?;
    assert_eq!(buffer_pool.pin_count(a), None);

    // Deleting a page that is not resident succeeds
    buffer_pool.delete_page(a)?;

    let (_, b) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(b, false)?;

    Ok(())
}
