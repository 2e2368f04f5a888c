use crate::error::{Result, SyncError};
use crate::types::Block;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use ulid::Ulid;

enum Backend {
    Memory(RwLock<HashMap<String, Bytes>>),
    Disk { base_path: PathBuf },
}

/// BlockStore is one storage node's content-addressed block repository.
/// Blocks are keyed by the SHA256 of their bytes, so writes of the same hash
/// always carry the same payload and concurrent puts converge.
pub struct BlockStore {
    backend: Backend,
}

impl BlockStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Blocks are stored in blocks/{hash[..2]}/{hash}
    pub fn on_disk(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("blocks"))?;
        Ok(Self {
            backend: Backend::Disk { base_path },
        })
    }

    pub async fn get_block(&self, hash: &str) -> Result<Block> {
        match &self.backend {
            Backend::Memory(blocks) => blocks
                .read()
                .await
                .get(hash)
                .cloned()
                .map(Block::new)
                .ok_or_else(|| SyncError::BlockNotFound(hash.to_string())),
            Backend::Disk { .. } => {
                let block_path = self.block_path(hash)?;
                match fs::read(&block_path).await {
                    Ok(data) => Ok(Block::new(data)),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                        Err(SyncError::BlockNotFound(hash.to_string()))
                    }
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    /// Store a block under the hash of its payload and return that hash.
    pub async fn put_block(&self, block: Block) -> Result<String> {
        let hash = block.hash();
        let size = block.size();

        match &self.backend {
            Backend::Memory(blocks) => {
                blocks.write().await.insert(hash.clone(), block.into_data());
            }
            Backend::Disk { .. } => {
                let block_path = self.block_path(&hash)?;
                if fs::try_exists(&block_path).await? {
                    return Ok(hash);
                }

                if let Some(parent) = block_path.parent() {
                    fs::create_dir_all(parent).await?;
                }

                // Unique temp name so concurrent puts of one hash never share a file
                let temp_path = block_path.with_extension(format!("{}.tmp", Ulid::new()));
                let mut file = fs::File::create(&temp_path).await?;
                file.write_all(block.data()).await?;
                file.sync_all().await?;
                drop(file);

                fs::rename(&temp_path, &block_path).await?;
            }
        }

        tracing::debug!("Stored block {} ({} bytes)", hash, size);
        Ok(hash)
    }

    pub async fn has_block(&self, hash: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(blocks) => Ok(blocks.read().await.contains_key(hash)),
            Backend::Disk { .. } => Ok(fs::try_exists(self.block_path(hash)?).await?),
        }
    }

    /// Hashes from `hashes` that this store does not hold, in input order.
    pub async fn missing_blocks(&self, hashes: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();

        for hash in hashes {
            if !seen.insert(hash.as_str()) {
                continue;
            }
            if !self.has_block(hash).await? {
                missing.push(hash.clone());
            }
        }

        Ok(missing)
    }

    pub async fn list_block_hashes(&self) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Memory(blocks) => Ok(blocks.read().await.keys().cloned().collect()),
            Backend::Disk { base_path } => {
                let mut hashes = Vec::new();
                let mut prefixes = fs::read_dir(base_path.join("blocks")).await?;

                while let Some(prefix) = prefixes.next_entry().await? {
                    if !prefix.file_type().await?.is_dir() {
                        continue;
                    }
                    let mut entries = fs::read_dir(prefix.path()).await?;
                    while let Some(entry) = entries.next_entry().await? {
                        if !entry.file_type().await?.is_file() {
                            continue;
                        }
                        if let Some(name) = entry.file_name().to_str() {
                            // in-flight temp files carry an extension
                            if !name.contains('.') {
                                hashes.push(name.to_string());
                            }
                        }
                    }
                }

                Ok(hashes)
            }
        }
    }

    fn block_path(&self, hash: &str) -> Result<PathBuf> {
        let Backend::Disk { base_path } = &self.backend else {
            return Err(SyncError::Internal(
                "block path requested for in-memory store".to_string(),
            ));
        };

        if hash.len() < 2 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SyncError::InvalidArgument(format!(
                "malformed block hash: {}",
                hash
            )));
        }

        Ok(base_path.join("blocks").join(&hash[..2]).join(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compute_hash;
    use std::sync::Arc;

    async fn exercise_store(store: &BlockStore) {
        let data = Bytes::from("test data content");
        let hash = compute_hash(&data);

        let returned = store.put_block(Block::new(data.clone())).await.unwrap();
        assert_eq!(returned, hash);

        let block = store.get_block(&hash).await.unwrap();
        assert_eq!(block.data(), &data);
        assert_eq!(block.size(), data.len());

        // putting the same bytes again changes nothing
        store.put_block(Block::new(data.clone())).await.unwrap();
        assert_eq!(store.list_block_hashes().await.unwrap(), vec![hash.clone()]);
    }

    #[tokio::test]
    async fn test_memory_block_round_trip() {
        exercise_store(&BlockStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_disk_block_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::on_disk(temp_dir.path().to_path_buf()).unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_get_unknown_block_is_not_found() {
        let store = BlockStore::in_memory();
        let result = store.get_block(&compute_hash(b"never stored")).await;
        assert!(matches!(result, Err(SyncError::BlockNotFound(_))));

        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::on_disk(temp_dir.path().to_path_buf()).unwrap();
        let result = store.get_block(&compute_hash(b"never stored")).await;
        assert!(matches!(result, Err(SyncError::BlockNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_blocks_is_set_difference() {
        let store = BlockStore::in_memory();
        let payloads: Vec<Bytes> = (0..6).map(|i| Bytes::from(format!("block-{}", i))).collect();
        let hashes: Vec<String> = payloads.iter().map(|p| compute_hash(p)).collect();

        for payload in &payloads[..3] {
            store.put_block(Block::new(payload.clone())).await.unwrap();
        }

        let mut query = hashes.clone();
        query.push(hashes[4].clone());
        let missing = store.missing_blocks(&query).await.unwrap();
        assert_eq!(missing, hashes[3..].to_vec());

        for payload in &payloads[3..] {
            store.put_block(Block::new(payload.clone())).await.unwrap();
        }
        assert!(store.missing_blocks(&hashes).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_puts_converge() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BlockStore::on_disk(temp_dir.path().to_path_buf()).unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                // half the tasks write the same payload
                let payload = if i % 2 == 0 {
                    "shared".to_string()
                } else {
                    format!("unique-{}", i)
                };
                store.put_block(Block::new(payload)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut hashes = store.list_block_hashes().await.unwrap();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 9);
        assert_eq!(store.list_block_hashes().await.unwrap().len(), 9);

        let shared = store.get_block(&compute_hash(b"shared")).await.unwrap();
        assert_eq!(shared.data(), &Bytes::from("shared"));
    }

    #[tokio::test]
    async fn test_disk_rejects_malformed_hash() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::on_disk(temp_dir.path().to_path_buf()).unwrap();
        let result = store.get_block("../../etc/passwd").await;
        assert!(matches!(result, Err(SyncError::InvalidArgument(_))));
    }
}
