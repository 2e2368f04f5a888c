//! JSON bodies shared by the HTTP routers and clients.

use crate::error::SyncError;
use crate::types::{FileInfoMap, FileMetaData, UpdateOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashesBody {
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBlockResponse {
    pub success: bool,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfoMapResponse {
    pub files: FileInfoMap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateFileResponse {
    pub accepted: bool,
    pub version: i64,
}

impl From<UpdateOutcome> for UpdateFileResponse {
    fn from(outcome: UpdateOutcome) -> Self {
        Self {
            accepted: outcome.is_accepted(),
            version: outcome.version(),
        }
    }
}

impl From<UpdateFileResponse> for UpdateOutcome {
    fn from(response: UpdateFileResponse) -> Self {
        if response.accepted {
            UpdateOutcome::Accepted {
                version: response.version,
            }
        } else {
            UpdateOutcome::Rejected {
                current: response.version,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFilesRequest {
    pub files: Vec<FileMetaData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFilesResponse {
    pub results: Vec<UpdateFileResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockStoreAddrsResponse {
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStoreAddrRequest {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingResponse {
    pub epoch: u64,
    pub addrs: Vec<String>,
}

/// Error payload returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub kind: String,
    pub error: String,
}

impl ApiErrorBody {
    pub fn from_error(error: &SyncError) -> Self {
        let kind = match error {
            SyncError::BlockNotFound(_) => "block_not_found",
            SyncError::FileNotFound(_) => "file_not_found",
            SyncError::VersionConflict { .. } => "version_conflict",
            SyncError::InvalidArgument(_) => "invalid_argument",
            SyncError::Unavailable(_) => "unavailable",
            SyncError::NoAvailableShard => "no_available_shard",
            _ => "internal",
        };
        Self {
            success: false,
            kind: kind.to_string(),
            error: error.to_string(),
        }
    }

    /// Rebuild a typed error on the client side. `subject` names the block or
    /// file the failed request was about.
    pub fn into_error(self, subject: &str) -> SyncError {
        match self.kind.as_str() {
            "block_not_found" => SyncError::BlockNotFound(subject.to_string()),
            "file_not_found" => SyncError::FileNotFound(subject.to_string()),
            "invalid_argument" => SyncError::InvalidArgument(self.error),
            "unavailable" => SyncError::Unavailable(self.error),
            "no_available_shard" => SyncError::NoAvailableShard,
            _ => SyncError::Http(self.error),
        }
    }
}
