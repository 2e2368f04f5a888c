use crate::error::{Result, SyncError};
use crate::storage::local_index::DEFAULT_META_FILENAME;
use crate::types::{Block, FileContent};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

const TEMP_SUFFIX: &str = ".shardsync-tmp";

/// SQLite companions of the local index.
const INDEX_SIDECARS: [&str; 3] = ["-journal", "-wal", "-shm"];

/// A file found on disk, split into fixed-size blocks.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub blocks: Vec<Block>,
}

impl LocalFile {
    pub fn hashes(&self) -> Vec<String> {
        self.blocks.iter().map(Block::hash).collect()
    }

    pub fn content(&self) -> FileContent {
        FileContent::Blocks(self.hashes())
    }
}

/// The flat directory a client synchronizes. Sub-directories are ignored.
pub struct LocalDirectory {
    base_dir: PathBuf,
    block_size: usize,
}

impl LocalDirectory {
    pub fn new(base_dir: PathBuf, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(SyncError::Config("block size must be positive".to_string()));
        }
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            block_size,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn is_internal(name: &str) -> bool {
        if name.ends_with(TEMP_SUFFIX) {
            return true;
        }
        match name.strip_prefix(DEFAULT_META_FILENAME) {
            Some("") => true,
            Some(rest) => INDEX_SIDECARS.contains(&rest),
            None => false,
        }
    }

    pub async fn scan(&self) -> Result<BTreeMap<String, LocalFile>> {
        let mut files = BTreeMap::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
                continue;
            };
            if Self::is_internal(&name) {
                continue;
            }

            let data = Bytes::from(fs::read(entry.path()).await?);
            let blocks = self.split(data);
            files.insert(name.clone(), LocalFile { name, blocks });
        }

        Ok(files)
    }

    pub fn split(&self, data: Bytes) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(data.len().div_ceil(self.block_size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.block_size).min(data.len());
            blocks.push(Block::new(data.slice(offset..end)));
            offset = end;
        }
        blocks
    }

    /// Replace `name` with the concatenation of `blocks`.
    pub async fn write_file(&self, name: &str, blocks: &[Block]) -> Result<()> {
        let target = self.base_dir.join(name);
        let temp_path = self
            .base_dir
            .join(format!(".{}.{}{}", name, Ulid::new(), TEMP_SUFFIX));

        let mut file = fs::File::create(&temp_path).await?;
        for block in blocks {
            file.write_all(block.data()).await?;
        }
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &target).await?;
        Ok(())
    }

    pub async fn remove_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.base_dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_splits_and_skips_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = LocalDirectory::new(temp_dir.path().to_path_buf(), 4).unwrap();

        std::fs::write(temp_dir.path().join("a.txt"), b"0123456789").unwrap();
        std::fs::write(temp_dir.path().join("empty.txt"), b"").unwrap();
        std::fs::write(temp_dir.path().join(DEFAULT_META_FILENAME), b"db").unwrap();
        std::fs::create_dir(temp_dir.path().join("nested")).unwrap();

        let files = dir.scan().await.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.txt", "empty.txt"]);

        let sizes: Vec<usize> = files["a.txt"].blocks.iter().map(Block::size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(files["empty.txt"].content(), FileContent::Blocks(vec![]));
    }

    #[tokio::test]
    async fn test_write_and_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = LocalDirectory::new(temp_dir.path().to_path_buf(), 3).unwrap();

        let blocks = dir.split(Bytes::from("hello world"));
        dir.write_file("out.txt", &blocks).await.unwrap();
        let written = std::fs::read(temp_dir.path().join("out.txt")).unwrap();
        assert_eq!(written, b"hello world");

        dir.remove_file("out.txt").await.unwrap();
        dir.remove_file("out.txt").await.unwrap();
        assert!(dir.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_files_resembling_the_index_are_scanned() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = LocalDirectory::new(temp_dir.path().to_path_buf(), 4).unwrap();

        for name in ["index.db", "index.db-journal", "index.db-wal", "index.db-shm"] {
            std::fs::write(temp_dir.path().join(name), b"sqlite").unwrap();
        }
        std::fs::write(temp_dir.path().join(".a.txt.01J.shardsync-tmp"), b"partial").unwrap();
        std::fs::write(temp_dir.path().join("index.dbx"), b"mine").unwrap();
        std::fs::write(temp_dir.path().join("index.db.txt"), b"notes").unwrap();

        let files = dir.scan().await.unwrap();
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["index.db.txt", "index.dbx"]
        );
    }
}
