use crate::snapshot::MetaSnapshot;
use async_trait::async_trait;
use shardsync_core::{
    BlockStoreMap, FileInfoMap, FileMetaData, HashRing, MetaService, Result, SyncError,
    UpdateOutcome,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owner of the namespace: the file index and block-store ring membership.
///
/// Commits are check-and-set on `version == current + 1` under one write
/// lock, so two clients racing on a file see exactly one winner. The ring is
/// swapped as a whole snapshot; readers resolve a batch against a single
/// epoch.
pub struct MetaAuthority {
    files: RwLock<FileInfoMap>,
    ring: RwLock<Arc<HashRing>>,
    snapshot: Option<MetaSnapshot>,
}

impl MetaAuthority {
    /// In-memory authority over the given block-store addresses.
    pub fn new<I, S>(block_store_addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: RwLock::new(FileInfoMap::new()),
            ring: RwLock::new(Arc::new(HashRing::new(block_store_addrs))),
            snapshot: None,
        }
    }

    /// Authority whose file index survives restarts in a SQLite file.
    pub fn open<I, S>(db_path: impl Into<PathBuf>, block_store_addrs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let snapshot = MetaSnapshot::open(db_path)?;
        let files = snapshot.load()?;
        tracing::info!(
            "Loaded {} file entries from {:?}",
            files.len(),
            snapshot.db_path()
        );

        Ok(Self {
            files: RwLock::new(files),
            ring: RwLock::new(Arc::new(HashRing::new(block_store_addrs))),
            snapshot: Some(snapshot),
        })
    }

    pub async fn get_file_info_map(&self) -> FileInfoMap {
        self.files.read().await.clone()
    }

    pub async fn update_file(&self, candidate: &FileMetaData) -> Result<UpdateOutcome> {
        candidate.validate()?;

        let mut files = self.files.write().await;
        self.apply(&mut files, candidate)
    }

    /// Commit several files at once. Each entry is checked on its own; the
    /// batch is refused before anything is applied if a filename repeats.
    pub async fn update_files(&self, batch: &[FileMetaData]) -> Result<Vec<UpdateOutcome>> {
        let mut seen = HashSet::new();
        for candidate in batch {
            candidate.validate()?;
            if !seen.insert(candidate.filename.as_str()) {
                return Err(SyncError::InvalidArgument(format!(
                    "duplicate filename in batch: {}",
                    candidate.filename
                )));
            }
        }

        let mut files = self.files.write().await;
        batch
            .iter()
            .map(|candidate| self.apply(&mut files, candidate))
            .collect()
    }

    fn apply(&self, files: &mut FileInfoMap, candidate: &FileMetaData) -> Result<UpdateOutcome> {
        let current = files
            .get(&candidate.filename)
            .map_or(0, |existing| existing.version);

        if candidate.version != current + 1 {
            tracing::debug!(
                "Rejected {} at version {}, current is {}",
                candidate.filename,
                candidate.version,
                current
            );
            return Ok(UpdateOutcome::Rejected { current });
        }

        if let Some(snapshot) = &self.snapshot {
            snapshot.upsert(candidate)?;
        }
        files.insert(candidate.filename.clone(), candidate.clone());

        tracing::info!(
            "Accepted {} at version {}{}",
            candidate.filename,
            candidate.version,
            if candidate.is_tombstone() { " (deleted)" } else { "" }
        );
        Ok(UpdateOutcome::Accepted {
            version: candidate.version,
        })
    }

    pub async fn ring(&self) -> Arc<HashRing> {
        self.ring.read().await.clone()
    }

    pub async fn ring_epoch(&self) -> u64 {
        self.ring.read().await.epoch()
    }

    pub async fn get_block_store_map(&self, hashes: &[String]) -> Result<BlockStoreMap> {
        let ring = self.ring().await;
        let stores = ring.partition(hashes)?;
        Ok(BlockStoreMap {
            epoch: ring.epoch(),
            stores,
        })
    }

    pub async fn get_block_store_addrs(&self) -> Vec<String> {
        self.ring().await.servers()
    }

    /// Put a block store on the ring. Adding a present member is a no-op.
    pub async fn add_block_store(&self, addr: &str) -> Result<Arc<HashRing>> {
        if addr.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "block store address cannot be empty".to_string(),
            ));
        }

        let mut ring = self.ring.write().await;
        let mut next = HashRing::clone(&ring);
        if next.add_server(addr) {
            tracing::info!("Block store {} joined, ring epoch {}", addr, next.epoch());
            *ring = Arc::new(next);
        }
        Ok(ring.clone())
    }

    /// Take a block store off the ring. Its hash range moves to the next
    /// member; blocks already stored there are not migrated.
    pub async fn remove_block_store(&self, addr: &str) -> Result<Arc<HashRing>> {
        let mut ring = self.ring.write().await;
        let mut next = HashRing::clone(&ring);
        if !next.remove_server(addr) {
            return Err(SyncError::InvalidArgument(format!(
                "{} is not a registered block store",
                addr
            )));
        }

        tracing::info!("Block store {} left, ring epoch {}", addr, next.epoch());
        *ring = Arc::new(next);
        Ok(ring.clone())
    }
}

#[async_trait]
impl MetaService for MetaAuthority {
    async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        Ok(MetaAuthority::get_file_info_map(self).await)
    }

    async fn update_file(&self, meta: &FileMetaData) -> Result<UpdateOutcome> {
        MetaAuthority::update_file(self, meta).await
    }

    async fn update_files(&self, files: &[FileMetaData]) -> Result<Vec<UpdateOutcome>> {
        MetaAuthority::update_files(self, files).await
    }

    async fn get_block_store_map(&self, hashes: &[String]) -> Result<BlockStoreMap> {
        MetaAuthority::get_block_store_map(self, hashes).await
    }

    async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        Ok(MetaAuthority::get_block_store_addrs(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardsync_core::{FileContent, compute_hash};

    fn file(name: &str, version: i64, data: &[u8]) -> FileMetaData {
        FileMetaData::new(name, version, FileContent::Blocks(vec![compute_hash(data)]))
    }

    #[tokio::test]
    async fn test_update_file_requires_next_version() {
        let authority = MetaAuthority::new(["127.0.0.1:9001"]);

        assert_eq!(
            authority.update_file(&file("a.txt", 5, b"x")).await.unwrap(),
            UpdateOutcome::Rejected { current: 0 }
        );
        assert!(authority.get_file_info_map().await.is_empty());

        assert_eq!(
            authority.update_file(&file("a.txt", 1, b"x")).await.unwrap(),
            UpdateOutcome::Accepted { version: 1 }
        );
        assert_eq!(
            authority.update_file(&file("a.txt", 1, b"y")).await.unwrap(),
            UpdateOutcome::Rejected { current: 1 }
        );

        let files = authority.get_file_info_map().await;
        assert_eq!(files["a.txt"], file("a.txt", 1, b"x"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_have_one_winner() {
        let authority = Arc::new(MetaAuthority::new(["127.0.0.1:9001"]));

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let authority = authority.clone();
            handles.push(tokio::spawn(async move {
                authority.update_file(&file("race.txt", 1, &[i])).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_accepted() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(authority.get_file_info_map().await["race.txt"].version, 1);
    }

    #[tokio::test]
    async fn test_tombstone_and_recreate() {
        let authority = MetaAuthority::new(["127.0.0.1:9001"]);
        authority.update_file(&file("doc", 1, b"v1")).await.unwrap();

        let outcome = authority
            .update_file(&FileMetaData::tombstone("doc", 2))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Accepted { version: 2 });
        assert!(authority.get_file_info_map().await["doc"].is_tombstone());

        let outcome = authority.update_file(&file("doc", 3, b"v3")).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Accepted { version: 3 });
        assert!(!authority.get_file_info_map().await["doc"].is_tombstone());
    }

    #[tokio::test]
    async fn test_invalid_candidates() {
        let authority = MetaAuthority::new(["127.0.0.1:9001"]);
        for candidate in [
            file("", 1, b"x"),
            file("dir/a", 1, b"x"),
            file("neg", -1, b"x"),
        ] {
            assert!(matches!(
                authority.update_file(&candidate).await,
                Err(SyncError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_files_batch() {
        let authority = MetaAuthority::new(["127.0.0.1:9001"]);
        authority.update_file(&file("b", 1, b"b1")).await.unwrap();

        let duplicate = [file("a", 1, b"x"), file("a", 1, b"y")];
        assert!(matches!(
            authority.update_files(&duplicate).await,
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(!authority.get_file_info_map().await.contains_key("a"));

        let results = authority
            .update_files(&[file("a", 1, b"x"), file("b", 1, b"b2"), file("c", 1, b"c")])
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                UpdateOutcome::Accepted { version: 1 },
                UpdateOutcome::Rejected { current: 1 },
                UpdateOutcome::Accepted { version: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_block_store_map_and_ring_changes() {
        let authority = MetaAuthority::new(["s1:1", "s2:1", "s3:1"]);
        let hashes: Vec<String> = (0..50u32)
            .map(|i| compute_hash(&i.to_le_bytes()))
            .collect();

        let map = authority.get_block_store_map(&hashes).await.unwrap();
        assert_eq!(map.epoch, 0);
        assert_eq!(map.hash_count(), 50);

        let ring = authority.remove_block_store("s2:1").await.unwrap();
        assert_eq!(ring.epoch(), 1);
        assert_eq!(authority.get_block_store_addrs().await.len(), 2);

        let map = authority.get_block_store_map(&hashes).await.unwrap();
        assert_eq!(map.epoch, 1);
        assert!(!map.stores.contains_key("s2:1"));

        assert!(matches!(
            authority.remove_block_store("s2:1").await,
            Err(SyncError::InvalidArgument(_))
        ));

        // re-adding an existing member leaves the epoch alone
        authority.add_block_store("s1:1").await.unwrap();
        assert_eq!(authority.ring_epoch().await, 1);
        authority.add_block_store("s4:1").await.unwrap();
        assert_eq!(authority.ring_epoch().await, 2);
    }

    #[tokio::test]
    async fn test_empty_ring_has_no_shard() {
        let authority = MetaAuthority::new(Vec::<String>::new());
        let result = authority.get_block_store_map(&[compute_hash(b"x")]).await;
        assert!(matches!(result, Err(SyncError::NoAvailableShard)));
    }

    #[tokio::test]
    async fn test_open_reloads_accepted_updates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("meta.db");

        {
            let authority = MetaAuthority::open(&db_path, ["s1:1"]).unwrap();
            authority.update_file(&file("kept", 1, b"k")).await.unwrap();
            authority.update_file(&file("kept", 3, b"lost")).await.unwrap();
        }

        let authority = MetaAuthority::open(&db_path, ["s1:1"]).unwrap();
        let files = authority.get_file_info_map().await;
        assert_eq!(files["kept"], file("kept", 1, b"k"));
    }
}
