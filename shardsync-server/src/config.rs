use serde::{Deserialize, Serialize};
use shardsync_core::{
    DEFAULT_BLOCK_SIZE, DEFAULT_MAX_COMMIT_ATTEMPTS, HttpClientOptions, Result, SyncError,
};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for every role the binary can play. Each subcommand reads only
/// its own section; missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub block_store: BlockStoreConfig,
    #[serde(default)]
    pub meta_store: MetaStoreConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStoreConfig {
    #[serde(default = "default_block_store_bind")]
    pub bind_addr: String,
    /// Keep blocks in memory when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for BlockStoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_block_store_bind(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaStoreConfig {
    #[serde(default = "default_meta_store_bind")]
    pub bind_addr: String,
    #[serde(default)]
    pub block_stores: Vec<String>,
    /// SQLite file for the file index. In-memory when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for MetaStoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_meta_store_bind(),
            block_stores: Vec::new(),
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_meta_store_bind")]
    pub meta_addr: String,
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_rpc_retries")]
    pub rpc_retries: u32,
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            meta_addr: default_meta_store_bind(),
            base_dir: default_base_dir(),
            block_size: default_block_size(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            rpc_retries: default_rpc_retries(),
            max_commit_attempts: default_max_commit_attempts(),
        }
    }
}

impl ClientConfig {
    pub fn http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            timeout: Duration::from_millis(self.rpc_timeout_ms),
            retries: self.rpc_retries,
        }
    }
}

fn default_block_store_bind() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_meta_store_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_rpc_timeout_ms() -> u64 {
    1000
}

fn default_rpc_retries() -> u32 {
    2
}

fn default_max_commit_attempts() -> u32 {
    DEFAULT_MAX_COMMIT_ATTEMPTS
}

impl Config {
    /// Load from an optional YAML/TOML file, then apply `SHARDSYNC_*`
    /// environment overrides such as `SHARDSYNC_CLIENT__META_ADDR`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("SHARDSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client.block_size == 0 {
            return Err(SyncError::Config("client.block_size must be positive".to_string()));
        }
        if self.client.rpc_timeout_ms == 0 {
            return Err(SyncError::Config(
                "client.rpc_timeout_ms must be positive".to_string(),
            ));
        }
        if self.client.max_commit_attempts == 0 {
            return Err(SyncError::Config(
                "client.max_commit_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
