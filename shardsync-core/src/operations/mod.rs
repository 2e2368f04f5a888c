pub mod classify;
pub mod sync;

pub use classify::{FileState, classify};
pub use sync::{
    DEFAULT_MAX_COMMIT_ATTEMPTS, FileSyncOutcome, FileSyncReport, SyncOperation,
    SyncOperationRequest, SyncOperationResult,
};
