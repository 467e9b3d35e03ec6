//! Queue Publisher Tests
//!
//! Envelope metadata, batch packing and failure propagation over the
//! in-memory transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{notification, transport, TEST_QUEUE};
use notification_pipeline::messaging::{codec, PublisherConfig};
use notification_pipeline::{NotificationPublisher, PipelineError, QueueTransport};
use tokio_test::{assert_err, assert_ok};

fn publisher_with_limit(
    transport: Arc<notification_pipeline::InMemoryTransport>,
    max_batch_size_bytes: usize,
) -> NotificationPublisher {
    NotificationPublisher::new(
        transport,
        PublisherConfig {
            max_batch_size_bytes,
            ..PublisherConfig::default()
        },
    )
}

#[tokio::test]
async fn send_one_delivers_a_decodable_payload() {
    let transport = transport();
    let publisher = NotificationPublisher::new(transport.clone(), PublisherConfig::default());
    let sent = notification("42");

    let msg_id = assert_ok!(publisher.send_one(&sent).await);

    let received = transport
        .receive(TEST_QUEUE, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.msg_id, msg_id);

    let props = received.properties.as_ref().unwrap();
    assert_eq!(props.content_type, "application/json");
    assert_eq!(props.subject, "ContosoUniversity.Notification");
    assert_eq!(props.time_to_live(), Duration::from_secs(24 * 60 * 60));

    assert_eq!(codec::decode(&received.body).unwrap(), sent);
}

#[tokio::test]
async fn send_batch_returns_ids_in_order() {
    let transport = transport();
    let publisher = NotificationPublisher::new(transport.clone(), PublisherConfig::default());
    let batch: Vec<_> = (1..=3).map(|i| notification(&i.to_string())).collect();

    let ids = assert_ok!(publisher.send_batch(&batch).await);
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    for expected in &batch {
        let received = transport
            .receive(TEST_QUEUE, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&codec::decode(&received.body).unwrap(), expected);
    }
}

#[tokio::test]
async fn oversized_batch_sends_nothing() {
    let transport = transport();
    let publisher = publisher_with_limit(transport.clone(), 600);
    let batch: Vec<_> = (1..=10).map(|i| notification(&i.to_string())).collect();

    let err = assert_err!(publisher.send_batch(&batch).await);
    assert!(matches!(err, PipelineError::BatchTooLarge { .. }));
    assert!(!err.is_retryable());
    assert_eq!(transport.queue_length(TEST_QUEUE).await, 0);
}

#[tokio::test]
async fn single_notification_larger_than_limit_fails_at_index_zero() {
    let transport = transport();
    let publisher = publisher_with_limit(transport.clone(), 16);

    match publisher.send_batch(&[notification("1")]).await {
        Err(PipelineError::BatchTooLarge { index, max_size_bytes }) => {
            assert_eq!(index, 0);
            assert_eq!(max_size_bytes, 16);
        }
        other => panic!("expected BatchTooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn send_failures_reach_the_caller() {
    let transport = transport();
    transport.set_available(false);
    let publisher = NotificationPublisher::new(transport.clone(), PublisherConfig::default());

    let err = assert_err!(publisher.send_one(&notification("1")).await);
    assert!(err.is_retryable());

    let err = assert_err!(publisher.send_batch(&[notification("1")]).await);
    assert!(matches!(err, PipelineError::Transport { .. }));

    transport.set_available(true);
    assert_eq!(transport.queue_length(TEST_QUEUE).await, 0);
}

#[tokio::test]
async fn expired_messages_are_not_delivered() {
    let transport = transport();
    let publisher = NotificationPublisher::new(
        transport.clone(),
        PublisherConfig {
            time_to_live: Duration::ZERO,
            ..PublisherConfig::default()
        },
    );

    publisher.send_one(&notification("1")).await.unwrap();

    let received = transport
        .receive(TEST_QUEUE, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(received.is_none());
    assert_eq!(transport.expired_count(), 1);
}
