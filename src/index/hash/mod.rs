pub mod error;
pub mod table;

pub use error::HashTableError;
pub use table::{default_hash, ExtendibleHashTable, HashFn};
