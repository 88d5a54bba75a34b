use std::collections::HashSet;
use anyhow::Result;

use taigadb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_parallel_pool;

#[test]
fn test_allocations_spread_over_instances() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 4)?;
    assert_eq!(pool.size(), 12);

    let mut page_ids = HashSet::new();
    let mut residues = HashSet::new();
    for _ in 0..6 {
        let (_, page_id) = pool.new_page()?;
        assert!(page_ids.insert(page_id), "page id {} reissued", page_id);
        residues.insert(page_id.rem_euclid(3));
        pool.unpin_page(page_id, false)?;
    }

    // Round-robin allocation touched every shard
    assert_eq!(residues.len(), 3);

    Ok(())
}

#[test]
fn test_operations_route_by_page_id() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(4, 2)?;

    let mut page_ids = Vec::new();
    for i in 0..8u8 {
        let (page, page_id) = pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0] = i;
        }
        pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    pool.flush_page(page_ids[0])?;
    pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched = pool.fetch_page(page_id)?;
        {
            let page_guard = fetched.read();
            assert_eq!(page_guard.data[0], i as u8);
        }
        pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_new_page_tries_every_instance() -> Result<()> {
    // Two shards of one frame each
    let (pool, _temp_file) = create_test_parallel_pool(2, 1)?;

    let (_, a) = pool.new_page()?;
    let (_, b) = pool.new_page()?;
    assert_ne!(
        a.rem_euclid(2),
        b.rem_euclid(2),
        "second allocation should fall over to the other shard"
    );

    // Both shards pinned full
    assert!(matches!(pool.new_page(), Err(BufferPoolError::NoFreeFrames)));

    // Freeing one shard is enough for the rotor to find it
    pool.unpin_page(a, false)?;
    let (_, c) = pool.new_page()?;
    assert_eq!(c.rem_euclid(2), a.rem_euclid(2));
    pool.unpin_page(b, false)?;
    pool.unpin_page(c, false)?;

    Ok(())
}

#[test]
fn test_delete_and_pin_count_route() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 2)?;

    let (_, a) = pool.new_page()?;
    assert_eq!(pool.pin_count(a), Some(1));
    pool.unpin_page(a, false)?;
    pool.delete_page(a)?;
    assert_eq!(pool.pin_count(a), None);

    Ok(())
}
