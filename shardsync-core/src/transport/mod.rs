//! Service seams between the sync engine and the remote components.
//!
//! The engine only talks to [`MetaService`] and [`BlockService`]; the HTTP
//! clients implement them over the network and the stores implement them
//! in-process.

pub mod http;
pub mod local;
pub mod wire;

use crate::error::Result;
use crate::types::{Block, BlockStoreMap, FileInfoMap, FileMetaData, UpdateOutcome};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use http::{HttpBlockClient, HttpBlockProvider, HttpClientOptions, HttpMetaClient};
pub use local::LocalBlockProvider;

/// RPC surface of a single block-store node.
#[async_trait]
pub trait BlockService: Send + Sync {
    async fn get_block(&self, hash: &str) -> Result<Block>;

    /// Returns the hash the store filed the block under.
    async fn put_block(&self, block: Block) -> Result<String>;

    async fn missing_blocks(&self, hashes: &[String]) -> Result<Vec<String>>;

    async fn list_block_hashes(&self) -> Result<Vec<String>>;
}

/// RPC surface of the metadata authority.
#[async_trait]
pub trait MetaService: Send + Sync {
    async fn get_file_info_map(&self) -> Result<FileInfoMap>;

    async fn update_file(&self, meta: &FileMetaData) -> Result<UpdateOutcome>;

    async fn update_files(&self, files: &[FileMetaData]) -> Result<Vec<UpdateOutcome>>;

    async fn get_block_store_map(&self, hashes: &[String]) -> Result<BlockStoreMap>;

    async fn get_block_store_addrs(&self) -> Result<Vec<String>>;
}

/// Hands out a [`BlockService`] for a block-store address.
pub trait BlockServiceProvider: Send + Sync {
    fn block_service(&self, addr: &str) -> Result<Arc<dyn BlockService>>;
}

/// Run `call` until it succeeds, fails with a non-retryable error, or
/// `retries` extra attempts have been spent.
pub async fn with_retries<T, F, Fut>(retries: u32, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Err(error) if error.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    what,
                    attempt,
                    retries + 1,
                    error
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> SyncError {
        SyncError::Unavailable("a:1 did not respond".to_string())
    }

    #[tokio::test]
    async fn test_with_retries_recovers_from_unavailable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retries(2, "ping", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retries(5, "ping", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::InvalidArgument("bad".to_string()))
        })
        .await;
        assert!(matches!(result, Err(SyncError::InvalidArgument(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retries_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = with_retries(1, "ping", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
