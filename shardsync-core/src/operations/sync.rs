use super::classify::{FileState, classify};
use crate::error::{Result, SyncError};
use crate::storage::{LocalDirectory, LocalFile, LocalIndex};
use crate::transport::{BlockServiceProvider, MetaService};
use crate::types::{Block, FileContent, FileInfoMap, FileMetaData, UpdateOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Passes over the shard map before a block transfer is given up. The second
/// pass re-resolves shards in case ring membership changed.
const TRANSFER_PASSES: usize = 2;

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct SyncOperation {
    meta: Arc<dyn MetaService>,
    blocks: Arc<dyn BlockServiceProvider>,
}

#[derive(Debug, Clone)]
pub struct SyncOperationRequest {
    pub base_dir: PathBuf,
    pub block_size: usize,
    pub max_commit_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileSyncOutcome {
    Unchanged,
    Uploaded { version: i64 },
    Downloaded { version: i64 },
    /// The local edit lost against a newer remote version and was replaced.
    ConflictOverwritten { version: i64 },
    Deleted { version: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSyncReport {
    pub filename: String,
    pub state: FileState,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: FileSyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOperationResult {
    pub files: Vec<FileSyncReport>,
    pub blocks_uploaded: usize,
    pub blocks_downloaded: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncOperationResult {
    pub fn report(&self, filename: &str) -> Option<&FileSyncReport> {
        self.files.iter().find(|report| report.filename == filename)
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileSyncReport> {
        self.files
            .iter()
            .filter(|report| matches!(report.outcome, FileSyncOutcome::Failed { .. }))
    }
}

struct FileResolution {
    report: FileSyncReport,
    /// Entry to record in the local index; `None` drops the file from it.
    baseline: Option<FileMetaData>,
    blocks_uploaded: usize,
    blocks_downloaded: usize,
}

struct SyncContext<'a> {
    dir: &'a LocalDirectory,
    // every block currently on disk, so downloads can reuse local content
    local_blocks: HashMap<String, Block>,
    max_commit_attempts: u32,
}

impl SyncOperation {
    pub fn new(meta: Arc<dyn MetaService>, blocks: Arc<dyn BlockServiceProvider>) -> Self {
        Self { meta, blocks }
    }

    pub async fn run(&self, request: SyncOperationRequest) -> Result<SyncOperationResult> {
        let SyncOperationRequest {
            base_dir,
            block_size,
            max_commit_attempts,
        } = request;

        let started_at = Utc::now();
        let dir = LocalDirectory::new(base_dir, block_size)?;
        let index = LocalIndex::open(dir.base_dir())?;

        let local_files = dir.scan().await?;
        let baselines = index.load()?;
        let remote_files = self.meta.get_file_info_map().await?;

        let local_blocks = local_files
            .values()
            .flat_map(|file| file.blocks.iter())
            .map(|block| (block.hash(), block.clone()))
            .collect();

        let ctx = SyncContext {
            dir: &dir,
            local_blocks,
            max_commit_attempts: max_commit_attempts.max(1),
        };

        let names: BTreeSet<&String> = local_files
            .keys()
            .chain(baselines.keys())
            .chain(remote_files.keys())
            .collect();

        tracing::info!(
            "Syncing {} files ({} local, {} remote) in {:?}",
            names.len(),
            local_files.len(),
            remote_files.len(),
            dir.base_dir()
        );

        let mut reports = Vec::with_capacity(names.len());
        let mut new_index = FileInfoMap::new();
        let mut blocks_uploaded = 0;
        let mut blocks_downloaded = 0;

        for name in names {
            let resolution = self
                .sync_file(
                    &ctx,
                    name,
                    local_files.get(name),
                    baselines.get(name),
                    remote_files.get(name).cloned(),
                )
                .await?;

            blocks_uploaded += resolution.blocks_uploaded;
            blocks_downloaded += resolution.blocks_downloaded;
            if let Some(baseline) = resolution.baseline {
                new_index.insert(name.clone(), baseline);
            }
            reports.push(resolution.report);
        }

        index.replace_all(&new_index)?;

        Ok(SyncOperationResult {
            files: reports,
            blocks_uploaded,
            blocks_downloaded,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn sync_file(
        &self,
        ctx: &SyncContext<'_>,
        name: &str,
        local: Option<&LocalFile>,
        base: Option<&FileMetaData>,
        mut remote: Option<FileMetaData>,
    ) -> Result<FileResolution> {
        let local_content = local.map(LocalFile::content);
        let mut attempts = 0u32;
        let mut commits = 0u32;
        // a commit whose answer never arrived
        let mut in_flight: Option<FileMetaData> = None;
        let mut blocks_uploaded = 0;

        loop {
            attempts += 1;
            let state = classify(local_content.as_ref(), base, remote.as_ref());

            let failed = |state: FileState, attempts: u32, blocks_uploaded: usize, error: SyncError| {
                tracing::warn!("Sync of {} failed: {}", name, error);
                FileResolution {
                    report: FileSyncReport {
                        filename: name.to_string(),
                        state,
                        attempts,
                        outcome: FileSyncOutcome::Failed {
                            reason: error.to_string(),
                        },
                    },
                    baseline: base.cloned(),
                    blocks_uploaded,
                    blocks_downloaded: 0,
                }
            };

            if state == FileState::Unchanged {
                let landed = in_flight.is_some() && in_flight.as_ref() == remote.as_ref();
                let outcome = match remote.as_ref() {
                    Some(remote) if landed && remote.is_tombstone() => FileSyncOutcome::Deleted {
                        version: remote.version,
                    },
                    Some(remote) if landed => FileSyncOutcome::Uploaded {
                        version: remote.version,
                    },
                    _ => FileSyncOutcome::Unchanged,
                };
                if landed {
                    tracing::info!("{} {:?} without an acknowledgement", name, outcome);
                }
                return Ok(FileResolution {
                    report: FileSyncReport {
                        filename: name.to_string(),
                        state,
                        attempts,
                        outcome,
                    },
                    baseline: remote.or_else(|| base.cloned()),
                    blocks_uploaded,
                    blocks_downloaded: 0,
                });
            }

            if state.needs_download() {
                let Some(remote) = remote else {
                    return Err(SyncError::Internal(format!(
                        "download of {} without a remote entry",
                        name
                    )));
                };

                // a bad name from the authority must not escape the directory
                if let Err(error) = remote.validate() {
                    return Ok(failed(state, attempts, blocks_uploaded, error));
                }

                return match self.download(ctx, &remote).await {
                    Ok(blocks_downloaded) => {
                        let outcome = match state {
                            FileState::Conflicting => {
                                tracing::warn!(
                                    "Local changes to {} were overwritten by remote version {}",
                                    name,
                                    remote.version
                                );
                                FileSyncOutcome::ConflictOverwritten {
                                    version: remote.version,
                                }
                            }
                            _ if remote.is_tombstone() => FileSyncOutcome::Deleted {
                                version: remote.version,
                            },
                            _ => FileSyncOutcome::Downloaded {
                                version: remote.version,
                            },
                        };
                        tracing::info!("{} {:?}", name, outcome);
                        Ok(FileResolution {
                            report: FileSyncReport {
                                filename: name.to_string(),
                                state,
                                attempts,
                                outcome,
                            },
                            baseline: Some(remote),
                            blocks_uploaded,
                            blocks_downloaded,
                        })
                    }
                    Err(error) if error.is_fatal() => Err(error),
                    Err(error) => Ok(failed(state, attempts, blocks_uploaded, error)),
                };
            }

            // upload path: NewLocal, LocallyModified, DeletedLocal
            if commits >= ctx.max_commit_attempts {
                return Err(SyncError::SyncConflict {
                    filename: name.to_string(),
                    attempts: commits,
                });
            }

            let remote_version = remote.as_ref().map_or(0, |remote| remote.version);
            let candidate = FileMetaData::new(
                name,
                remote_version + 1,
                local_content.clone().unwrap_or(FileContent::Deleted),
            );

            if let Some(local) = local {
                match self.upload(local).await {
                    Ok(count) => blocks_uploaded += count,
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => return Ok(failed(state, attempts, blocks_uploaded, error)),
                }
            }

            commits += 1;
            in_flight = None;
            match self.meta.update_file(&candidate).await {
                Ok(UpdateOutcome::Accepted { version }) => {
                    let outcome = if candidate.is_tombstone() {
                        FileSyncOutcome::Deleted { version }
                    } else {
                        FileSyncOutcome::Uploaded { version }
                    };
                    tracing::info!("{} {:?}", name, outcome);
                    return Ok(FileResolution {
                        report: FileSyncReport {
                            filename: name.to_string(),
                            state,
                            attempts,
                            outcome,
                        },
                        baseline: Some(FileMetaData { version, ..candidate }),
                        blocks_uploaded,
                        blocks_downloaded: 0,
                    });
                }
                Ok(UpdateOutcome::Rejected { current }) => {
                    tracing::warn!(
                        "Commit of {} at version {} rejected, authority is at {}",
                        name,
                        candidate.version,
                        current
                    );
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!("Commit of {} did not complete: {}", name, error);
                    in_flight = Some(candidate);
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => return Ok(failed(state, attempts, blocks_uploaded, error)),
            }

            remote = match self.meta.get_file_info_map().await {
                Ok(mut files) => files.remove(name),
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => return Ok(failed(state, attempts, blocks_uploaded, error)),
            };
        }
    }

    /// Push the blocks of `file` that their owning shards do not hold yet.
    async fn upload(&self, file: &LocalFile) -> Result<usize> {
        let mut by_hash: HashMap<String, &Block> = HashMap::new();
        let mut pending = Vec::new();
        for block in &file.blocks {
            let hash = block.hash();
            if !by_hash.contains_key(&hash) {
                by_hash.insert(hash.clone(), block);
                pending.push(hash);
            }
        }

        let mut uploaded = 0;
        let mut last_error = None;

        for _ in 0..TRANSFER_PASSES {
            if pending.is_empty() {
                break;
            }

            let shard_map = self.meta.get_block_store_map(&pending).await?;
            let mut failed = Vec::new();

            for (addr, hashes) in &shard_map.stores {
                let service = match self.blocks.block_service(addr) {
                    Ok(service) => service,
                    Err(error) if error.is_retryable() => {
                        failed.extend(hashes.iter().cloned());
                        last_error = Some(error);
                        continue;
                    }
                    Err(error) => return Err(error),
                };
                let missing = match service.missing_blocks(hashes).await {
                    Ok(missing) => missing,
                    Err(error) if error.is_retryable() => {
                        failed.extend(hashes.iter().cloned());
                        last_error = Some(error);
                        continue;
                    }
                    Err(error) => return Err(error),
                };

                for hash in missing {
                    let Some(block) = by_hash.get(&hash) else {
                        continue;
                    };
                    match service.put_block((*block).clone()).await {
                        Ok(_) => {
                            tracing::debug!("Uploaded block {} to {}", hash, addr);
                            uploaded += 1;
                        }
                        Err(error) if error.is_retryable() => {
                            failed.push(hash);
                            last_error = Some(error);
                        }
                        Err(error) => return Err(error),
                    }
                }
            }

            pending = failed;
        }

        if !pending.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                SyncError::Unavailable(format!("{} blocks of {} not stored", pending.len(), file.name))
            }));
        }

        Ok(uploaded)
    }

    /// Bring the local copy of `remote.filename` in line with `remote`.
    async fn download(&self, ctx: &SyncContext<'_>, remote: &FileMetaData) -> Result<usize> {
        let hashes = match &remote.content {
            FileContent::Deleted => {
                ctx.dir.remove_file(&remote.filename).await?;
                return Ok(0);
            }
            FileContent::Blocks(hashes) => hashes,
        };

        let mut fetched: HashMap<String, Block> = HashMap::new();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for hash in hashes {
            if !seen.insert(hash.as_str()) {
                continue;
            }
            match ctx.local_blocks.get(hash) {
                Some(block) => {
                    fetched.insert(hash.clone(), block.clone());
                }
                None => pending.push(hash.clone()),
            }
        }

        let mut downloaded = 0;
        let mut last_error = None;

        for _ in 0..TRANSFER_PASSES {
            if pending.is_empty() {
                break;
            }

            let shard_map = self.meta.get_block_store_map(&pending).await?;
            let mut failed = Vec::new();

            for (addr, hashes) in &shard_map.stores {
                let service = match self.blocks.block_service(addr) {
                    Ok(service) => service,
                    Err(error) if error.is_retryable() => {
                        failed.extend(hashes.iter().cloned());
                        last_error = Some(error);
                        continue;
                    }
                    Err(error) => return Err(error),
                };
                for hash in hashes {
                    match service.get_block(hash).await {
                        Ok(block) if block.hash() == *hash => {
                            tracing::debug!("Downloaded block {} from {}", hash, addr);
                            fetched.insert(hash.clone(), block);
                            downloaded += 1;
                        }
                        Ok(block) => {
                            failed.push(hash.clone());
                            last_error = Some(SyncError::HashMismatch {
                                expected: hash.clone(),
                                actual: block.hash(),
                            });
                        }
                        Err(error @ (SyncError::BlockNotFound(_) | SyncError::Unavailable(_))) => {
                            failed.push(hash.clone());
                            last_error = Some(error);
                        }
                        Err(error) => return Err(error),
                    }
                }
            }

            pending = failed;
        }

        if !pending.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                SyncError::BlockNotFound(pending.join(","))
            }));
        }

        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let block = fetched
                .get(hash)
                .ok_or_else(|| SyncError::BlockNotFound(hash.clone()))?;
            blocks.push(block.clone());
        }
        ctx.dir.write_file(&remote.filename, &blocks).await?;

        Ok(downloaded)
    }
}
