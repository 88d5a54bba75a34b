use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use taigadb::index::hash::ExtendibleHashTable;
use taigadb::storage::buffer::{BufferPoolManager, ParallelBufferPoolManager};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a sharded buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: u32,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let pool = Arc::new(ParallelBufferPoolManager::new(num_instances, pool_size, path)?);
    Ok((pool, file))
}

// Identity hash, so tests can steer keys into chosen buckets
#[allow(dead_code)]
pub fn identity_hash(key: i32) -> u32 {
    key as u32
}

// Hash table with tiny buckets and the identity hash, for split/merge tests
#[allow(dead_code)]
pub fn create_tiny_hash_table(
    pool_size: usize,
    bucket_capacity: usize,
) -> Result<(ExtendibleHashTable, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let table = ExtendibleHashTable::with_hasher(buffer_pool.clone(), bucket_capacity, identity_hash)?;
    Ok((table, buffer_pool, file))
}
