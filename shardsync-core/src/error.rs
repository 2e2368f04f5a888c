use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Version conflict for {filename}: expected {expected}, current {current}")]
    VersionConflict {
        filename: String,
        expected: i64,
        current: i64,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("No block store available in the hash ring")]
    NoAvailableShard,

    #[error("Gave up reconciling {filename} after {attempts} attempts")]
    SyncConflict { filename: String, attempts: u32 },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SyncError {
    /// Transient transport failures. The same call may succeed if repeated,
    /// possibly against a freshly resolved shard.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Unavailable(_))
    }

    /// Errors that abort a whole sync run instead of a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidArgument(_)
                | SyncError::NoAvailableShard
                | SyncError::SyncConflict { .. }
                | SyncError::Config(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            SyncError::Unavailable(error.to_string())
        } else {
            SyncError::Http(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
