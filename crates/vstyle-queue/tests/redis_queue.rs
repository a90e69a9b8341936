//! Redis Streams queue integration tests.

use std::time::Duration;

use vstyle_models::{FrameJob, StorageLayout, VideoJob};
use vstyle_queue::{FrameQueue, LeaseOutcome, QueueConfig, QueueError, RedisFrameQueue};

async fn queue(visibility: Duration) -> RedisFrameQueue {
    dotenvy::dotenv().ok();

    let config = QueueConfig {
        namespace: format!("vstyle-test-{}", uuid::Uuid::new_v4().simple()),
        visibility_timeout: visibility,
        max_deliveries: 2,
        ..QueueConfig::from_env()
    };
    let queue = RedisFrameQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

fn jobs(count: u32) -> Vec<FrameJob> {
    let video = VideoJob::new("dance.mp4", StorageLayout::default()).unwrap();
    (1..=count)
        .map(|i| FrameJob::for_frame(&video, video.layout.frame_filename(i)))
        .collect()
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_send_lease_ack() {
    let queue = queue(Duration::from_secs(60)).await;

    assert_eq!(queue.send_batch(&jobs(3)).await.unwrap(), 3);
    assert_eq!(queue.len().await.unwrap(), 3);

    let LeaseOutcome::Leased(lease) = queue.lease(Duration::from_secs(1)).await.unwrap() else {
        panic!("expected a message");
    };
    assert_eq!(lease.frame_job().unwrap().input_frame, "000001_frame.jpg");
    assert_eq!(lease.delivery_count, 1);

    queue.ack(&lease).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 2);
    assert!(matches!(queue.ack(&lease).await, Err(QueueError::LeaseLost(_))));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_empty_queue_is_not_an_error() {
    let queue = queue(Duration::from_secs(60)).await;

    let outcome = queue.lease(Duration::ZERO).await.unwrap();
    assert!(matches!(outcome, LeaseOutcome::Empty));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_expired_lease_is_redelivered() {
    let queue = queue(Duration::from_secs(1)).await;
    queue.send_batch(&jobs(1)).await.unwrap();

    let LeaseOutcome::Leased(first) = queue.lease(Duration::ZERO).await.unwrap() else {
        panic!("expected a message");
    };
    assert!(matches!(queue.lease(Duration::ZERO).await.unwrap(), LeaseOutcome::Empty));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let LeaseOutcome::Leased(second) = queue.lease(Duration::ZERO).await.unwrap() else {
        panic!("expected redelivery");
    };
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.payload, first.payload);
    assert!(second.is_redelivery());
    queue.ack(&second).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dead_letter_moves_message() {
    let queue = queue(Duration::from_secs(60)).await;
    queue.send_batch(&jobs(1)).await.unwrap();

    let LeaseOutcome::Leased(lease) = queue.lease(Duration::ZERO).await.unwrap() else {
        panic!("expected a message");
    };
    queue.dead_letter(&lease, "bad frame").await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reclaimed_entry_rejects_previous_holder() {
    let first = queue(Duration::from_secs(1)).await;
    let second = RedisFrameQueue::new(first.config().clone()).expect("Failed to create queue");
    first.send_batch(&jobs(1)).await.unwrap();

    let LeaseOutcome::Leased(stale) = first.lease(Duration::ZERO).await.unwrap() else {
        panic!("expected a message");
    };
    first.renew(&stale).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let LeaseOutcome::Leased(current) = second.lease(Duration::ZERO).await.unwrap() else {
        panic!("expected the expired lease to be reclaimed");
    };
    assert_eq!(current.message_id, stale.message_id);

    assert!(matches!(first.renew(&stale).await, Err(QueueError::LeaseLost(_))));
    assert!(matches!(first.ack(&stale).await, Err(QueueError::LeaseLost(_))));
    assert!(matches!(
        first.dead_letter(&stale, "late").await,
        Err(QueueError::LeaseLost(_))
    ));
    assert_eq!(first.dlq_len().await.unwrap(), 0);

    second.renew(&current).await.unwrap();
    second.ack(&current).await.unwrap();
    assert_eq!(first.len().await.unwrap(), 0);
}
