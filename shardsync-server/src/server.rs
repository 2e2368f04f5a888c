use crate::config::{BlockStoreConfig, MetaStoreConfig};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use shardsync_core::transport::wire::{
    ApiErrorBody, BlockStoreAddrRequest, BlockStoreAddrsResponse, FileInfoMapResponse,
    HashesBody, PutBlockResponse, RingResponse, UpdateFileResponse, UpdateFilesRequest,
    UpdateFilesResponse,
};
use shardsync_core::{Block, BlockStore, BlockStoreMap, FileMetaData, HashRing, Result, SyncError};
use shardsync_meta::MetaAuthority;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const MAX_BLOCK_BODY: usize = 64 * 1024 * 1024;

/// Wraps [`SyncError`] so handlers can return it with `?`.
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::BlockNotFound(_) | SyncError::FileNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::InvalidArgument(_) | SyncError::HashMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            SyncError::VersionConflict { .. } | SyncError::SyncConflict { .. } => {
                StatusCode::CONFLICT
            }
            SyncError::Unavailable(_) | SyncError::NoAvailableShard => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(ApiErrorBody::from_error(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---- block store ----

pub fn block_store_router(store: Arc<BlockStore>) -> Router {
    Router::new()
        .route("/health", get(block_store_health))
        .route("/blocks", put(put_block).get(list_block_hashes))
        .route("/blocks/missing", post(missing_blocks))
        .route("/blocks/:hash", get(get_block))
        .layer(DefaultBodyLimit::max(MAX_BLOCK_BODY))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

pub async fn run_block_store(config: BlockStoreConfig) -> Result<()> {
    let store = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Storing blocks under {:?}", dir);
            BlockStore::on_disk(dir.clone())?
        }
        None => {
            tracing::info!("Storing blocks in memory");
            BlockStore::in_memory()
        }
    };

    let app = block_store_router(Arc::new(store));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Block store listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn block_store_health(State(store): State<Arc<BlockStore>>) -> ApiResult<impl IntoResponse> {
    let blocks = store.list_block_hashes().await?.len();
    Ok(Json(serde_json::json!({
        "status": "ok",
        "role": "block_store",
        "blocks": blocks,
    })))
}

async fn get_block(
    State(store): State<Arc<BlockStore>>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let block = store.get_block(&hash).await?;
    Ok((StatusCode::OK, block.into_data()).into_response())
}

async fn put_block(State(store): State<Arc<BlockStore>>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let hash = store.put_block(Block::new(body)).await?;
    tracing::debug!("Stored block {}", hash);
    Ok(Json(PutBlockResponse {
        success: true,
        hash,
    }))
}

async fn missing_blocks(
    State(store): State<Arc<BlockStore>>,
    Json(request): Json<HashesBody>,
) -> ApiResult<Json<HashesBody>> {
    let hashes = store.missing_blocks(&request.hashes).await?;
    Ok(Json(HashesBody { hashes }))
}

async fn list_block_hashes(State(store): State<Arc<BlockStore>>) -> ApiResult<Json<HashesBody>> {
    let hashes = store.list_block_hashes().await?;
    Ok(Json(HashesBody { hashes }))
}

// ---- metadata authority ----

pub fn meta_router(authority: Arc<MetaAuthority>) -> Router {
    Router::new()
        .route("/health", get(meta_health))
        .route("/files", get(get_file_info_map).post(update_file))
        .route("/files/batch", post(update_files))
        .route("/block-store-map", post(get_block_store_map))
        .route("/block-stores", get(get_block_store_addrs).post(add_block_store))
        .route("/block-stores/:addr", delete(remove_block_store))
        .layer(TraceLayer::new_for_http())
        .with_state(authority)
}

pub async fn run_meta_store(config: MetaStoreConfig) -> Result<()> {
    let authority = match &config.db_path {
        Some(path) => MetaAuthority::open(path.clone(), config.block_stores.iter().cloned())?,
        None => MetaAuthority::new(config.block_stores.iter().cloned()),
    };
    tracing::info!(
        "Metadata authority with {} block stores: {:?}",
        config.block_stores.len(),
        config.block_stores
    );

    let app = meta_router(Arc::new(authority));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Meta store listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn ring_response(ring: &HashRing) -> RingResponse {
    RingResponse {
        epoch: ring.epoch(),
        addrs: ring.servers(),
    }
}

async fn meta_health(State(authority): State<Arc<MetaAuthority>>) -> impl IntoResponse {
    let ring = authority.ring().await;
    let files = authority.get_file_info_map().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "role": "meta_store",
        "files": files,
        "block_stores": ring.len(),
        "ring_epoch": ring.epoch(),
    }))
}

async fn get_file_info_map(State(authority): State<Arc<MetaAuthority>>) -> Json<FileInfoMapResponse> {
    Json(FileInfoMapResponse {
        files: authority.get_file_info_map().await,
    })
}

async fn update_file(
    State(authority): State<Arc<MetaAuthority>>,
    Json(candidate): Json<FileMetaData>,
) -> ApiResult<Json<UpdateFileResponse>> {
    let outcome = authority.update_file(&candidate).await?;
    Ok(Json(outcome.into()))
}

async fn update_files(
    State(authority): State<Arc<MetaAuthority>>,
    Json(request): Json<UpdateFilesRequest>,
) -> ApiResult<Json<UpdateFilesResponse>> {
    let outcomes = authority.update_files(&request.files).await?;
    Ok(Json(UpdateFilesResponse {
        results: outcomes.into_iter().map(Into::into).collect(),
    }))
}

async fn get_block_store_map(
    State(authority): State<Arc<MetaAuthority>>,
    Json(request): Json<HashesBody>,
) -> ApiResult<Json<BlockStoreMap>> {
    Ok(Json(authority.get_block_store_map(&request.hashes).await?))
}

async fn get_block_store_addrs(
    State(authority): State<Arc<MetaAuthority>>,
) -> Json<BlockStoreAddrsResponse> {
    Json(BlockStoreAddrsResponse {
        addrs: authority.get_block_store_addrs().await,
    })
}

async fn add_block_store(
    State(authority): State<Arc<MetaAuthority>>,
    Json(request): Json<BlockStoreAddrRequest>,
) -> ApiResult<Json<RingResponse>> {
    let ring = authority.add_block_store(&request.addr).await?;
    Ok(Json(ring_response(&ring)))
}

async fn remove_block_store(
    State(authority): State<Arc<MetaAuthority>>,
    Path(addr): Path<String>,
) -> ApiResult<Json<RingResponse>> {
    let ring = authority.remove_block_store(&addr).await?;
    Ok(Json(ring_response(&ring)))
}
