pub mod bucket_page;
pub mod directory_page;

pub use bucket_page::{HashBucketPage, HashKey, BUCKET_ARRAY_SIZE};
pub use directory_page::{HashDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
