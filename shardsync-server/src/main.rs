mod config;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use shardsync_core::{
    FileSyncOutcome, HttpBlockProvider, HttpMetaClient, MetaService, SyncOperation,
    SyncOperationRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "shardsync")]
#[command(about = "Sharded content-addressed file synchronization")]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve blocks for one shard of the ring
    BlockStore {
        #[arg(long)]
        bind: Option<String>,

        /// Persist blocks under this directory instead of memory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Serve the file index and ring membership
    MetaStore {
        #[arg(long)]
        bind: Option<String>,

        /// Block store address; repeat for each member of the ring
        #[arg(long = "block-store")]
        block_stores: Vec<String>,

        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Reconcile a local directory with the meta store
    Sync {
        /// Directory to synchronize
        dir: Option<PathBuf>,

        #[arg(long)]
        meta: Option<String>,

        #[arg(long)]
        block_size: Option<usize>,
    },

    /// Inspect or change ring membership
    Ring {
        #[arg(long)]
        meta: Option<String>,

        #[command(subcommand)]
        action: RingAction,
    },
}

#[derive(Subcommand)]
enum RingAction {
    List,
    Add { addr: String },
    Remove { addr: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::BlockStore { bind, data_dir } => {
            if let Some(bind) = bind {
                cfg.block_store.bind_addr = bind;
            }
            if data_dir.is_some() {
                cfg.block_store.data_dir = data_dir;
            }
            server::run_block_store(cfg.block_store).await?;
        }
        Commands::MetaStore {
            bind,
            block_stores,
            db_path,
        } => {
            if let Some(bind) = bind {
                cfg.meta_store.bind_addr = bind;
            }
            if !block_stores.is_empty() {
                cfg.meta_store.block_stores = block_stores;
            }
            if db_path.is_some() {
                cfg.meta_store.db_path = db_path;
            }
            server::run_meta_store(cfg.meta_store).await?;
        }
        Commands::Sync {
            dir,
            meta,
            block_size,
        } => {
            if let Some(dir) = dir {
                cfg.client.base_dir = dir;
            }
            if let Some(meta) = meta {
                cfg.client.meta_addr = meta;
            }
            if let Some(block_size) = block_size {
                cfg.client.block_size = block_size;
            }
            run_sync(&cfg).await?;
        }
        Commands::Ring { meta, action } => {
            if let Some(meta) = meta {
                cfg.client.meta_addr = meta;
            }
            run_ring(&cfg, action).await?;
        }
    }

    Ok(())
}

async fn run_sync(cfg: &Config) -> anyhow::Result<()> {
    let options = cfg.client.http_options();
    let meta = HttpMetaClient::new(cfg.client.meta_addr.clone(), options)?;
    let blocks = HttpBlockProvider::new(options)?;

    tracing::info!(
        "Syncing {:?} against {}",
        cfg.client.base_dir,
        cfg.client.meta_addr
    );

    let result = SyncOperation::new(Arc::new(meta), Arc::new(blocks))
        .run(SyncOperationRequest {
            base_dir: cfg.client.base_dir.clone(),
            block_size: cfg.client.block_size,
            max_commit_attempts: cfg.client.max_commit_attempts,
        })
        .await?;

    for report in &result.files {
        if report.outcome != FileSyncOutcome::Unchanged {
            println!("{}\t{:?}", report.filename, report.outcome);
        }
    }
    tracing::info!(
        "Sync finished in {} ms: {} files, {} blocks up, {} blocks down",
        (result.finished_at - result.started_at).num_milliseconds(),
        result.files.len(),
        result.blocks_uploaded,
        result.blocks_downloaded
    );

    let failed = result.failed().count();
    if failed > 0 {
        anyhow::bail!("{} files failed to sync, rerun to retry them", failed);
    }
    Ok(())
}

async fn run_ring(cfg: &Config, action: RingAction) -> anyhow::Result<()> {
    let client = HttpMetaClient::new(cfg.client.meta_addr.clone(), cfg.client.http_options())?;

    let addrs = match action {
        RingAction::List => client.get_block_store_addrs().await?,
        RingAction::Add { addr } => {
            let ring = client.add_block_store(&addr).await?;
            tracing::info!("Ring epoch is now {}", ring.epoch);
            ring.addrs
        }
        RingAction::Remove { addr } => {
            let ring = client.remove_block_store(&addr).await?;
            tracing::info!("Ring epoch is now {}", ring.epoch);
            ring.addrs
        }
    };

    for addr in addrs {
        println!("{}", addr);
    }
    Ok(())
}
