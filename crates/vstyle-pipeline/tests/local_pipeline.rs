//! End-to-end run over a mounted directory with real FFmpeg.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use vstyle_media::{FfmpegCodec, ImageStyleTransformer, Style};
use vstyle_models::{StorageLayout, VideoJob};
use vstyle_pipeline::{Pipeline, PipelineConfig};
use vstyle_queue::MemoryQueue;
use vstyle_storage::{LocalStore, ObjectStore};
use vstyle_worker::{FrameProcessor, FrameWorker, WorkerConfig};

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_stylize_short_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mount = dir.path().join("mount");
    tokio::fs::create_dir_all(&mount).await.unwrap();

    let status = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=duration=2:size=64x64:rate=30"])
        .args(["-f", "lavfi", "-i", "sine=duration=2", "-c:a", "aac", "-shortest"])
        .arg(mount.join("clip.mp4"))
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(&mount));
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(300)));
    let layout = StorageLayout::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_config = WorkerConfig {
        work_dir: dir.path().join("worker"),
        receive_timeout: Duration::from_millis(100),
        empty_backoff: Duration::from_millis(100),
        ..Default::default()
    };
    let processor = FrameProcessor::new(
        store.clone(),
        Arc::new(ImageStyleTransformer::new(Style::Grayscale)),
        dir.path().join("worker"),
    )
    .with_log_upload(true);
    let worker = FrameWorker::new(worker_config, queue.clone(), processor, shutdown_rx.clone());
    let handle = tokio::spawn(async move { worker.run().await });

    let config = PipelineConfig {
        work_dir: dir.path().join("pipeline"),
        poll_interval: Duration::from_millis(200),
        max_wait: Some(Duration::from_secs(120)),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        config,
        store.clone(),
        queue.clone(),
        Arc::new(FfmpegCodec::new(&layout)),
        shutdown_rx,
    );

    let video = VideoJob::new("clip.mp4", layout).unwrap().with_style(Some("sepia".to_string()));
    let report = pipeline.run(video).await.unwrap();

    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(report.frame_count, 60);
    assert_eq!(report.submitted, 60);
    assert_eq!(stats.processed, 60);
    assert!(mount.join("clip/clip_processed.mp4").exists());
    assert!(mount.join("clip/logs/000001_frame.log").exists());
}
