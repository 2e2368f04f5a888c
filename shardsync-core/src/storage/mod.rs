//! Storage modules for ShardSync
//!
//! Provides content-addressed block storage, the client-side index and the
//! local directory the client keeps in sync.

pub mod block_store;
pub mod local_dir;
pub mod local_index;

pub use block_store::BlockStore;
pub use local_dir::{LocalDirectory, LocalFile};
pub use local_index::{DEFAULT_META_FILENAME, LocalIndex};
