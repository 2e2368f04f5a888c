pub mod error;
pub mod hash_ring;
pub mod operations;
pub mod storage;
pub mod transport;
pub mod types;

pub use error::{Result, SyncError};
pub use hash_ring::HashRing;
pub use operations::{
    DEFAULT_MAX_COMMIT_ATTEMPTS, FileState, FileSyncOutcome, FileSyncReport, SyncOperation,
    SyncOperationRequest, SyncOperationResult,
};
pub use storage::{BlockStore, LocalDirectory, LocalFile, LocalIndex};
pub use transport::{
    BlockService, BlockServiceProvider, HttpBlockClient, HttpBlockProvider, HttpClientOptions,
    HttpMetaClient, LocalBlockProvider, MetaService,
};
pub use types::{
    Block, BlockStoreMap, DEFAULT_BLOCK_SIZE, EMPTY_FILE_HASH_VALUE, FileContent, FileInfoMap,
    FileMetaData, TOMBSTONE_HASH_VALUE, UpdateOutcome, compute_hash, verify_hash,
};
