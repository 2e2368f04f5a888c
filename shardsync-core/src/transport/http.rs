use super::wire::{
    ApiErrorBody, BlockStoreAddrRequest, BlockStoreAddrsResponse, FileInfoMapResponse,
    HashesBody, PutBlockResponse, RingResponse, UpdateFileResponse, UpdateFilesRequest,
    UpdateFilesResponse,
};
use super::{BlockService, BlockServiceProvider, MetaService, with_retries};
use crate::error::{Result, SyncError};
use crate::types::{
    Block, BlockStoreMap, FileInfoMap, FileMetaData, UpdateOutcome, verify_hash,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct HttpClientOptions {
    /// Upper bound for a single request, connect included.
    pub timeout: Duration,
    /// Extra attempts for idempotent calls that fail with `Unavailable`.
    pub retries: u32,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            retries: 2,
        }
    }
}

impl HttpClientOptions {
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| SyncError::Config(format!("failed to build http client: {}", error)))
    }
}

fn endpoint(addr: &str, path: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{}{}", addr.trim_end_matches('/'), path)
    } else {
        format!("http://{}{}", addr, path)
    }
}

async fn check_response(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_slice::<ApiErrorBody>(&body) {
        return Err(api_error.into_error(subject));
    }

    Err(match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            SyncError::Unavailable(format!("{} returned {}", subject, status))
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::InvalidArgument(
            format!("{}: {}", subject, String::from_utf8_lossy(&body)),
        ),
        _ => SyncError::Http(format!("{} returned {}", subject, status)),
    })
}

/// Client for one block-store node.
#[derive(Clone)]
pub struct HttpBlockClient {
    addr: String,
    client: Client,
    retries: u32,
}

impl HttpBlockClient {
    pub fn new(addr: impl Into<String>, options: HttpClientOptions) -> Result<Self> {
        Ok(Self::with_client(addr, options.build_client()?, options.retries))
    }

    pub fn with_client(addr: impl Into<String>, client: Client, retries: u32) -> Self {
        Self {
            addr: addr.into(),
            client,
            retries,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn try_get_block(&self, hash: &str) -> Result<Block> {
        let url = endpoint(&self.addr, &format!("/blocks/{}", hash));
        let response = self.client.get(url).send().await?;
        let response = check_response(response, hash).await?;
        let data = response.bytes().await?;

        verify_hash(&data, hash)?;
        Ok(Block::new(data))
    }

    async fn try_put_block(&self, block: Block) -> Result<String> {
        let url = endpoint(&self.addr, "/blocks");
        let expected = block.hash();
        let response = self
            .client
            .put(url)
            .body(block.into_data())
            .send()
            .await?;
        let response = check_response(response, &expected).await?;
        let payload: PutBlockResponse = response.json().await?;

        if !payload.success {
            return Err(SyncError::Http(format!(
                "block store {} refused block {}",
                self.addr, expected
            )));
        }
        if payload.hash != expected {
            return Err(SyncError::HashMismatch {
                expected,
                actual: payload.hash,
            });
        }
        Ok(payload.hash)
    }

    async fn try_missing_blocks(&self, hashes: &[String]) -> Result<Vec<String>> {
        let url = endpoint(&self.addr, "/blocks/missing");
        let response = self
            .client
            .post(url)
            .json(&HashesBody {
                hashes: hashes.to_vec(),
            })
            .send()
            .await?;
        let response = check_response(response, &self.addr).await?;
        let payload: HashesBody = response.json().await?;
        Ok(payload.hashes)
    }

    async fn try_list_block_hashes(&self) -> Result<Vec<String>> {
        let url = endpoint(&self.addr, "/blocks");
        let response = self.client.get(url).send().await?;
        let response = check_response(response, &self.addr).await?;
        let payload: HashesBody = response.json().await?;
        Ok(payload.hashes)
    }
}

#[async_trait]
impl BlockService for HttpBlockClient {
    async fn get_block(&self, hash: &str) -> Result<Block> {
        with_retries(self.retries, "get_block", move || self.try_get_block(hash)).await
    }

    async fn put_block(&self, block: Block) -> Result<String> {
        with_retries(self.retries, "put_block", move || {
            self.try_put_block(block.clone())
        })
        .await
    }

    async fn missing_blocks(&self, hashes: &[String]) -> Result<Vec<String>> {
        with_retries(self.retries, "missing_blocks", move || {
            self.try_missing_blocks(hashes)
        })
        .await
    }

    async fn list_block_hashes(&self) -> Result<Vec<String>> {
        with_retries(self.retries, "list_block_hashes", move || {
            self.try_list_block_hashes()
        })
        .await
    }
}

/// Creates [`HttpBlockClient`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpBlockProvider {
    client: Client,
    retries: u32,
}

impl HttpBlockProvider {
    pub fn new(options: HttpClientOptions) -> Result<Self> {
        Ok(Self {
            client: options.build_client()?,
            retries: options.retries,
        })
    }
}

impl BlockServiceProvider for HttpBlockProvider {
    fn block_service(&self, addr: &str) -> Result<Arc<dyn BlockService>> {
        Ok(Arc::new(HttpBlockClient::with_client(
            addr,
            self.client.clone(),
            self.retries,
        )))
    }
}

/// Client for the metadata authority.
#[derive(Clone)]
pub struct HttpMetaClient {
    addr: String,
    client: Client,
    retries: u32,
}

impl HttpMetaClient {
    pub fn new(addr: impl Into<String>, options: HttpClientOptions) -> Result<Self> {
        Ok(Self {
            addr: addr.into(),
            client: options.build_client()?,
            retries: options.retries,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn try_get_file_info_map(&self) -> Result<FileInfoMap> {
        let url = endpoint(&self.addr, "/files");
        let response = self.client.get(url).send().await?;
        let response = check_response(response, &self.addr).await?;
        let payload: FileInfoMapResponse = response.json().await?;
        Ok(payload.files)
    }

    async fn try_get_block_store_map(&self, hashes: &[String]) -> Result<BlockStoreMap> {
        let url = endpoint(&self.addr, "/block-store-map");
        let response = self
            .client
            .post(url)
            .json(&HashesBody {
                hashes: hashes.to_vec(),
            })
            .send()
            .await?;
        let response = check_response(response, &self.addr).await?;
        Ok(response.json().await?)
    }

    async fn try_get_block_store_addrs(&self) -> Result<Vec<String>> {
        let url = endpoint(&self.addr, "/block-stores");
        let response = self.client.get(url).send().await?;
        let response = check_response(response, &self.addr).await?;
        let payload: BlockStoreAddrsResponse = response.json().await?;
        Ok(payload.addrs)
    }

    /// Register a block store on the authority's ring.
    pub async fn add_block_store(&self, addr: &str) -> Result<RingResponse> {
        let url = endpoint(&self.addr, "/block-stores");
        let response = self
            .client
            .post(url)
            .json(&BlockStoreAddrRequest {
                addr: addr.to_string(),
            })
            .send()
            .await?;
        let response = check_response(response, addr).await?;
        Ok(response.json().await?)
    }

    /// Take a block store off the authority's ring.
    pub async fn remove_block_store(&self, addr: &str) -> Result<RingResponse> {
        let url = endpoint(&self.addr, &format!("/block-stores/{}", addr));
        let response = self.client.delete(url).send().await?;
        let response = check_response(response, addr).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MetaService for HttpMetaClient {
    async fn get_file_info_map(&self) -> Result<FileInfoMap> {
        with_retries(self.retries, "get_file_info_map", move || {
            self.try_get_file_info_map()
        })
        .await
    }

    // Not retried here: a lost response may hide an accepted commit, so the
    // caller re-reads the index instead.
    async fn update_file(&self, meta: &FileMetaData) -> Result<UpdateOutcome> {
        let url = endpoint(&self.addr, "/files");
        let response = self.client.post(url).json(meta).send().await?;
        let response = check_response(response, &meta.filename).await?;
        let payload: UpdateFileResponse = response.json().await?;
        Ok(payload.into())
    }

    async fn update_files(&self, files: &[FileMetaData]) -> Result<Vec<UpdateOutcome>> {
        let url = endpoint(&self.addr, "/files/batch");
        let response = self
            .client
            .post(url)
            .json(&UpdateFilesRequest {
                files: files.to_vec(),
            })
            .send()
            .await?;
        let response = check_response(response, &self.addr).await?;
        let payload: UpdateFilesResponse = response.json().await?;
        Ok(payload.results.into_iter().map(Into::into).collect())
    }

    async fn get_block_store_map(&self, hashes: &[String]) -> Result<BlockStoreMap> {
        with_retries(self.retries, "get_block_store_map", move || {
            self.try_get_block_store_map(hashes)
        })
        .await
    }

    async fn get_block_store_addrs(&self) -> Result<Vec<String>> {
        with_retries(self.retries, "get_block_store_addrs", move || {
            self.try_get_block_store_addrs()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint("localhost:8081", "/blocks"), "http://localhost:8081/blocks");
        assert_eq!(
            endpoint("https://meta.example/", "/files"),
            "https://meta.example/files"
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        let options = HttpClientOptions {
            timeout: Duration::from_millis(200),
            retries: 0,
        };
        // port 1 on localhost is never listening in test environments
        let client = HttpBlockClient::new("127.0.0.1:1", options).unwrap();
        let result = client.list_block_hashes().await;
        assert!(matches!(result, Err(SyncError::Unavailable(_))), "{:?}", result.err());
    }
}
