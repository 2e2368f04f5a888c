use crate::error::{Result, SyncError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Wire sentinel for a deleted file.
pub const TOMBSTONE_HASH_VALUE: &str = "0";

/// Wire sentinel for a zero-length file.
pub const EMPTY_FILE_HASH_VALUE: &str = "-1";

/// Default block size used by clients when chunking files.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that data matches the expected hash
pub fn verify_hash(data: &[u8], expected_hash: &str) -> Result<()> {
    let actual_hash = compute_hash(data);
    if actual_hash != expected_hash {
        return Err(SyncError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        });
    }
    Ok(())
}

/// An immutable piece of file content. Its identity is the hash of `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Bytes,
    size: usize,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len();
        Self { data, size }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn hash(&self) -> String {
        compute_hash(&self.data)
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// What a file currently holds according to some index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Ordered block hashes; concatenating the blocks rebuilds the file.
    Blocks(Vec<String>),
    Deleted,
}

impl FileContent {
    pub fn is_deleted(&self) -> bool {
        matches!(self, FileContent::Deleted)
    }

    pub fn block_hashes(&self) -> &[String] {
        match self {
            FileContent::Blocks(hashes) => hashes,
            FileContent::Deleted => &[],
        }
    }

    /// Encode into the sentinel-based list used on the wire and in SQLite.
    pub fn to_hash_list(&self) -> Vec<String> {
        match self {
            FileContent::Deleted => vec![TOMBSTONE_HASH_VALUE.to_string()],
            FileContent::Blocks(hashes) if hashes.is_empty() => {
                vec![EMPTY_FILE_HASH_VALUE.to_string()]
            }
            FileContent::Blocks(hashes) => hashes.clone(),
        }
    }

    pub fn from_hash_list(list: Vec<String>) -> Result<Self> {
        match list.as_slice() {
            [single] if single == TOMBSTONE_HASH_VALUE => Ok(FileContent::Deleted),
            [single] if single == EMPTY_FILE_HASH_VALUE => Ok(FileContent::Blocks(Vec::new())),
            _ => {
                if list
                    .iter()
                    .any(|hash| hash == TOMBSTONE_HASH_VALUE || hash == EMPTY_FILE_HASH_VALUE)
                {
                    return Err(SyncError::InvalidArgument(
                        "sentinel hash mixed with block hashes".to_string(),
                    ));
                }
                Ok(FileContent::Blocks(list))
            }
        }
    }
}

/// One entry of a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FileMetaDataWire", try_from = "FileMetaDataWire")]
pub struct FileMetaData {
    pub filename: String,
    pub version: i64,
    pub content: FileContent,
}

impl FileMetaData {
    pub fn new(filename: impl Into<String>, version: i64, content: FileContent) -> Self {
        Self {
            filename: filename.into(),
            version,
            content,
        }
    }

    pub fn tombstone(filename: impl Into<String>, version: i64) -> Self {
        Self::new(filename, version, FileContent::Deleted)
    }

    pub fn is_tombstone(&self) -> bool {
        self.content.is_deleted()
    }

    pub fn validate(&self) -> Result<()> {
        if self.filename.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "filename cannot be empty".to_string(),
            ));
        }
        if self.filename.contains('/') || self.filename == "." || self.filename == ".." {
            return Err(SyncError::InvalidArgument(format!(
                "invalid filename: {}",
                self.filename
            )));
        }
        if self.version < 0 {
            return Err(SyncError::InvalidArgument(format!(
                "negative version {} for {}",
                self.version, self.filename
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMetaDataWire {
    filename: String,
    version: i64,
    block_hash_list: Vec<String>,
}

impl From<FileMetaData> for FileMetaDataWire {
    fn from(meta: FileMetaData) -> Self {
        Self {
            block_hash_list: meta.content.to_hash_list(),
            filename: meta.filename,
            version: meta.version,
        }
    }
}

impl TryFrom<FileMetaDataWire> for FileMetaData {
    type Error = String;

    fn try_from(wire: FileMetaDataWire) -> std::result::Result<Self, Self::Error> {
        let content = FileContent::from_hash_list(wire.block_hash_list)
            .map_err(|error| error.to_string())?;
        Ok(Self {
            filename: wire.filename,
            version: wire.version,
            content,
        })
    }
}

/// Filename-keyed index, ordered so that sync runs are deterministic.
pub type FileInfoMap = BTreeMap<String, FileMetaData>;

/// Result of an optimistic-concurrency commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted { version: i64 },
    Rejected { current: i64 },
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted { .. })
    }

    /// The authority's version after the call.
    pub fn version(&self) -> i64 {
        match self {
            UpdateOutcome::Accepted { version } => *version,
            UpdateOutcome::Rejected { current } => *current,
        }
    }
}

/// Shard assignment for a batch of block hashes, resolved against one ring
/// snapshot identified by `epoch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStoreMap {
    pub epoch: u64,
    pub stores: BTreeMap<String, Vec<String>>,
}

impl BlockStoreMap {
    pub fn addr_for(&self, hash: &str) -> Option<&str> {
        self.stores
            .iter()
            .find(|(_, hashes)| hashes.iter().any(|candidate| candidate == hash))
            .map(|(addr, _)| addr.as_str())
    }

    pub fn hash_count(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash(b"hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(verify_hash(b"hello world", &hash).is_ok());
        assert!(matches!(
            verify_hash(b"hello", &hash),
            Err(SyncError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_sentinel_encoding() {
        let deleted = FileMetaData::tombstone("a.txt", 3);
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["block_hash_list"], serde_json::json!(["0"]));

        let empty = FileMetaData::new("b.txt", 1, FileContent::Blocks(vec![]));
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["block_hash_list"], serde_json::json!(["-1"]));

        let decoded: FileMetaData = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, empty);
    }

    #[test]
    fn test_sentinel_mixed_with_hashes_is_rejected() {
        let raw = serde_json::json!({
            "filename": "c.txt",
            "version": 1,
            "block_hash_list": ["0", "abcd"],
        });
        assert!(serde_json::from_value::<FileMetaData>(raw).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(FileMetaData::tombstone("ok.txt", 0).validate().is_ok());
        assert!(FileMetaData::tombstone("", 1).validate().is_err());
        assert!(FileMetaData::tombstone("x.txt", -1).validate().is_err());
        assert!(FileMetaData::tombstone("../x", 1).validate().is_err());
    }
}
