//! Pipeline binary: split, enqueue, wait and assemble one video.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vstyle_media::{FfmpegCodec, MediaCodec};
use vstyle_models::VideoJob;
use vstyle_queue::{FrameQueue, QueueConfig, RedisFrameQueue};
use vstyle_storage::{ObjectStore, StorageConfig};
use vstyle_worker::{init_tracing, metrics, FrameProcessor, FrameWorker, JobLogger, WorkerConfig};

use vstyle_pipeline::{Assembler, Enqueuer, Pipeline, PipelineConfig, Splitter};

#[derive(Debug, Parser)]
#[command(name = "vstyle-pipeline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split, enqueue, wait for every frame, then assemble
    Run(RunArgs),
    /// Split the source video into frames and audio
    Split(VideoArgs),
    /// Enqueue frame jobs for an already split video
    Enqueue(EnqueueArgs),
    /// Assemble transformed frames into the output video
    Assemble(AssembleArgs),
}

#[derive(Debug, Args)]
struct VideoArgs {
    /// Key of the source video in the object store
    #[arg(long, env = "VIDEO")]
    video: String,
}

#[derive(Debug, Args)]
struct EnqueueArgs {
    #[command(flatten)]
    video: VideoArgs,

    /// Style applied to every frame
    #[arg(long, env = "STYLE")]
    style: Option<String>,

    /// Enqueue at most this many frames
    #[arg(long, env = "QUEUE_LIMIT")]
    queue_limit: Option<u32>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    enqueue: EnqueueArgs,

    /// Stop once frames are queued
    #[arg(long)]
    terminate: bool,

    /// Stop waiting for outputs after this many seconds
    #[arg(long, env = "MONITOR_MAX_WAIT_SECS")]
    max_wait_secs: Option<u64>,

    /// Re-enqueue missing frames this many times before failing
    #[arg(long, env = "RECONCILE_ATTEMPTS")]
    reconcile_attempts: Option<u32>,

    /// Run this many frame workers in this process
    #[arg(long, default_value_t = 0)]
    local_workers: usize,
}

#[derive(Debug, Args)]
struct AssembleArgs {
    #[command(flatten)]
    video: VideoArgs,

    /// Number of frames that were submitted
    #[arg(long)]
    expected: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// and HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();
    metrics::install_exporter_from_env()?;

    let store = vstyle_storage::connect(&StorageConfig::from_env()?)?;
    let codec: Arc<dyn MediaCodec> = match config.ffmpeg_timeout_secs {
        Some(secs) => Arc::new(FfmpegCodec::new(&config.layout).with_timeout(secs)),
        None => Arc::new(FfmpegCodec::new(&config.layout)),
    };
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("failed to create work dir {}", config.work_dir.display()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        });
    }

    match cli.command {
        Command::Split(args) => {
            let video = VideoJob::new(args.video, config.layout.clone())?;
            let out = Splitter::new(store, codec, &config.work_dir)
                .with_concurrency(config.transfer_concurrency)
                .split(&video, &JobLogger::for_video(&video.id, "split"))
                .await?;
            info!("Split {} into {} frames", video.id, out.frame_count);
        }
        Command::Enqueue(args) => {
            let video = VideoJob::new(args.video.video, config.layout.clone())?.with_style(args.style);
            let report = Enqueuer::new(store, connect_queue().await?)
                .with_batch_size(config.batch_size)
                .enqueue(&video, args.queue_limit, &JobLogger::for_video(&video.id, "enqueue"))
                .await?;
            info!("Enqueued {} frames of {}", report.submitted, video.id);
        }
        Command::Assemble(args) => {
            let video = VideoJob::new(args.video.video, config.layout.clone())?;
            let out = Assembler::new(store, codec, &config.work_dir)
                .with_concurrency(config.transfer_concurrency)
                .assemble(&video, args.expected, &JobLogger::for_video(&video.id, "assemble"))
                .await?;
            info!("Assembled {}", out.output_key);
        }
        Command::Run(args) => {
            config.terminate |= args.terminate;
            if args.max_wait_secs.is_some() {
                config.max_wait = args.max_wait_secs.map(Duration::from_secs);
            }
            if let Some(attempts) = args.reconcile_attempts {
                config.reconcile_attempts = attempts;
            }

            let video = VideoJob::new(args.enqueue.video.video, config.layout.clone())?
                .with_style(args.enqueue.style)
                .with_submission_cap(args.enqueue.queue_limit);

            let workers = spawn_local_workers(args.local_workers, &store, &shutdown_rx).await?;
            let pipeline = Pipeline::new(config, store, connect_queue().await?, codec, shutdown_rx);
            let result = pipeline.run(video).await;

            let _ = shutdown_tx.send(true);
            for handle in workers {
                match handle.await {
                    Ok(Ok(stats)) => info!("Local worker processed {} frames", stats.processed),
                    Ok(Err(e)) => warn!("Local worker failed: {}", e),
                    Err(e) => warn!("Local worker panicked: {}", e),
                }
            }

            let report = result?;
            match &report.output_key {
                Some(key) => info!(
                    "Produced {} from {} of {} frames in {:.1}s",
                    key,
                    report.submitted,
                    report.frame_count,
                    report.timings.total.as_secs_f64()
                ),
                None => info!(
                    "Queued {} of {} frames; assembly left to a later run",
                    report.submitted, report.frame_count
                ),
            }
        }
    }

    Ok(())
}

async fn connect_queue() -> anyhow::Result<Arc<dyn FrameQueue>> {
    let queue = RedisFrameQueue::from_env()?;
    queue.init().await.context("failed to initialize frame queue")?;
    Ok(Arc::new(queue))
}

/// Start `count` frame workers sharing this process's store.
///
/// Each worker gets its own queue connection and consumer name.
async fn spawn_local_workers(
    count: usize,
    store: &Arc<dyn ObjectStore>,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<Vec<JoinHandle<vstyle_worker::WorkerResult<vstyle_worker::WorkerStats>>>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut config = WorkerConfig::from_env()?;
    config.terminate = false;
    config.dequeue_limit = None;
    let transformer = config.transformer.build(config.default_style.as_deref())?;
    let queue_config = QueueConfig::from_env();

    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let queue = RedisFrameQueue::new(queue_config.clone())?;
        queue.init().await.context("failed to initialize frame queue")?;

        let work_dir = config.work_dir.join(format!("local-{}", i));
        let processor = FrameProcessor::new(store.clone(), transformer.clone(), work_dir)
            .with_default_style(config.default_style.clone())
            .with_log_upload(config.upload_job_logs)
            .with_retry(config.storage_retry.clone());
        let worker = FrameWorker::new(config.clone(), Arc::new(queue), processor, shutdown.clone());

        handles.push(tokio::spawn(async move { worker.run().await }));
    }
    info!("Started {} local workers", count);

    Ok(handles)
}
