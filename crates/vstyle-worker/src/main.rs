//! Frame worker binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use vstyle_queue::RedisFrameQueue;
use vstyle_storage::StorageConfig;
use vstyle_worker::{init_tracing, metrics, FrameProcessor, FrameWorker, WorkerConfig};

/// Lease frame jobs from the queue and stylize them until stopped.
#[derive(Debug, Parser)]
#[command(name = "vstyle-worker", version, about)]
struct Args {
    /// Exit as soon as the queue is empty
    #[arg(long)]
    terminate: bool,

    /// Exit after leasing this many messages
    #[arg(long)]
    dequeue_limit: Option<u64>,

    /// Style for jobs that carry none
    #[arg(long)]
    style_default: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// and HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let mut config = WorkerConfig::from_env()?;
    config.terminate |= args.terminate;
    if args.dequeue_limit.is_some() {
        config.dequeue_limit = args.dequeue_limit;
    }
    if args.style_default.is_some() {
        config.default_style = args.style_default;
    }
    info!("Worker config: {:?}", config);

    metrics::install_exporter_from_env()?;

    let store = vstyle_storage::connect(&StorageConfig::from_env()?)?;
    let queue = RedisFrameQueue::from_env()?;
    queue.init().await.context("failed to initialize frame queue")?;
    info!("Consuming as {}", queue.consumer_name());

    let transformer = config.transformer.build(config.default_style.as_deref())?;
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("failed to create work dir {}", config.work_dir.display()))?;

    let processor = FrameProcessor::new(store, transformer, &config.work_dir)
        .with_default_style(config.default_style.clone())
        .with_log_upload(config.upload_job_logs)
        .with_retry(config.storage_retry.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let worker = FrameWorker::new(config, Arc::new(queue), processor, shutdown_rx);
    let stats = worker.run().await?;

    info!(
        "Worker finished: {} leased, {} processed, {} failed, {} dead-lettered",
        stats.leased, stats.processed, stats.failed, stats.dead_lettered
    );
    Ok(())
}
