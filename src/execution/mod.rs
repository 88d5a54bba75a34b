// Execution interface for the iterator-based execution model.
//
// Plan nodes become executors composed into a tree; each executor pulls
// rows from its children and owns them as boxed trait objects. Operator
// implementations live with the query engine; this crate only defines the
// seam they share with the storage and transaction layers.

use thiserror::Error;

use crate::common::types::Rid;
use crate::index::hash::HashTableError;
use crate::storage::buffer::BufferPoolError;
use crate::transaction::TransactionAbort;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Hash table error: {0}")]
    HashTable(#[from] HashTableError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] TransactionAbort),
}

/// The columns an executor produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// A materialized row, opaque to this layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The Executor trait defines the interface every plan-node executor
/// implements. `init` resets the executor to the start of its stream;
/// `next` yields the following row and its record ID, or `None` at the end
/// of the stream.
pub trait Executor: Send {
    /// Prepare the executor before the first `next` call
    fn init(&mut self) -> Result<(), ExecutionError>;

    /// Produce the next row, or `None` when the stream is exhausted
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError>;

    /// The schema of the rows this executor produces
    fn output_schema(&self) -> &Schema;
}
