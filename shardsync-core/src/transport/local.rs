use super::{BlockService, BlockServiceProvider};
use crate::error::{Result, SyncError};
use crate::storage::BlockStore;
use crate::types::Block;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[async_trait]
impl BlockService for BlockStore {
    async fn get_block(&self, hash: &str) -> Result<Block> {
        BlockStore::get_block(self, hash).await
    }

    async fn put_block(&self, block: Block) -> Result<String> {
        BlockStore::put_block(self, block).await
    }

    async fn missing_blocks(&self, hashes: &[String]) -> Result<Vec<String>> {
        BlockStore::missing_blocks(self, hashes).await
    }

    async fn list_block_hashes(&self) -> Result<Vec<String>> {
        BlockStore::list_block_hashes(self).await
    }
}

/// In-process block stores keyed by the address they are registered under.
#[derive(Default)]
pub struct LocalBlockProvider {
    stores: RwLock<HashMap<String, Arc<dyn BlockService>>>,
}

impl LocalBlockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: impl Into<String>, store: Arc<dyn BlockService>) {
        if let Ok(mut stores) = self.stores.write() {
            stores.insert(addr.into(), store);
        }
    }

    pub fn remove(&self, addr: &str) -> Option<Arc<dyn BlockService>> {
        self.stores.write().ok()?.remove(addr)
    }
}

impl BlockServiceProvider for LocalBlockProvider {
    fn block_service(&self, addr: &str) -> Result<Arc<dyn BlockService>> {
        let stores = self
            .stores
            .read()
            .map_err(|_| SyncError::Internal("block provider lock poisoned".to_string()))?;
        stores
            .get(addr)
            .cloned()
            .ok_or_else(|| SyncError::Unavailable(format!("no block store at {}", addr)))
    }
}
