//! # Notification Publisher
//!
//! Sends notifications to the durable queue. Unlike the local store, send
//! failures are logged and returned to the caller: a caller that needs
//! at-least-once durability must know when delivery did not happen.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::logging::log_queue_operation;
use crate::messaging::envelope::{MessageBatch, MessageEnvelope};
use crate::messaging::transport::QueueTransport;
use crate::models::Notification;

/// Publisher settings derived from [`PipelineConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub queue_name: String,
    pub subject: String,
    pub time_to_live: Duration,
    pub max_batch_size_bytes: usize,
}

impl From<&PipelineConfig> for PublisherConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            queue_name: config.queue_name.clone(),
            subject: config.subject.clone(),
            time_to_live: config.time_to_live(),
            max_batch_size_bytes: config.max_batch_size_bytes,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Durable-path producer
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    transport: Arc<dyn QueueTransport>,
    config: PublisherConfig,
}

impl NotificationPublisher {
    pub fn new(transport: Arc<dyn QueueTransport>, config: PublisherConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Start an empty batch sized to the configured byte limit
    pub fn create_batch(&self) -> MessageBatch {
        MessageBatch::new(self.config.max_batch_size_bytes)
    }

    fn envelope(&self, notification: &Notification) -> Result<MessageEnvelope> {
        MessageEnvelope::for_notification(
            notification,
            &self.config.subject,
            self.config.time_to_live,
        )
    }

    /// Send a single notification, returning the broker-assigned message id
    #[instrument(skip(self, notification), fields(queue = %self.config.queue_name, entity_type = %notification.entity_type(), entity_id = %notification.entity_id()))]
    pub async fn send_one(&self, notification: &Notification) -> Result<i64> {
        let envelope = self.envelope(notification)?;

        match self.transport.send(&self.config.queue_name, &envelope).await {
            Ok(msg_id) => {
                info!(
                    msg_id,
                    message_id = %envelope.properties.message_id,
                    "Notification sent to queue"
                );
                log_queue_operation("send", &self.config.queue_name, Some(msg_id), "success", None);
                Ok(msg_id)
            }
            Err(e) => {
                error!(error = %e, "Error sending notification");
                log_queue_operation(
                    "send",
                    &self.config.queue_name,
                    None,
                    "failed",
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Pack every notification into one batch and submit it as a unit.
    ///
    /// Fails with [`PipelineError::BatchTooLarge`] before anything is sent if a
    /// notification does not fit; callers needing more than one batch must
    /// chunk their input themselves.
    #[instrument(skip(self, notifications), fields(queue = %self.config.queue_name, count = notifications.len()))]
    pub async fn send_batch(&self, notifications: &[Notification]) -> Result<Vec<i64>> {
        if notifications.is_empty() {
            debug!("Empty notification batch, nothing to send");
            return Ok(Vec::new());
        }

        let result = self.build_and_send_batch(notifications).await;

        match &result {
            Ok(msg_ids) => {
                info!(sent = msg_ids.len(), "Batch notifications sent to queue");
                log_queue_operation("send_batch", &self.config.queue_name, None, "success", None);
            }
            Err(e) => {
                error!(error = %e, "Error sending batch notifications");
                log_queue_operation(
                    "send_batch",
                    &self.config.queue_name,
                    None,
                    "failed",
                    Some(&e.to_string()),
                );
            }
        }

        result
    }

    async fn build_and_send_batch(&self, notifications: &[Notification]) -> Result<Vec<i64>> {
        let mut batch = self.create_batch();

        for (index, notification) in notifications.iter().enumerate() {
            if !batch.try_add(self.envelope(notification)?)? {
                return Err(PipelineError::BatchTooLarge {
                    index,
                    max_size_bytes: batch.max_size_bytes(),
                });
            }
        }

        debug!(size_bytes = batch.size_bytes(), "Submitting notification batch");
        self.transport
            .send_batch(&self.config.queue_name, batch)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::codec;
    use crate::messaging::memory_transport::InMemoryTransport;
    use crate::models::{EntityEvent, EntityOperation};
    use chrono::Utc;

    const QUEUE: &str = "notifications";

    fn notification(entity_id: &str) -> Notification {
        let event = EntityEvent::new("Student", entity_id, EntityOperation::Create);
        Notification::from_event(event, Utc::now()).unwrap()
    }

    fn publisher(
        transport: Arc<InMemoryTransport>,
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
    async fn test_send_one_attaches_metadata() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        let publisher = publisher(transport.clone(), 256 * 1024);

        publisher.send_one(&notification("42")).await.unwrap();

        let documents = transport.pending_documents(QUEUE).await;
        assert_eq!(documents.len(), 1);
        let props = &documents[0]["properties"];
        assert_eq!(props["contentType"], "application/json");
        assert_eq!(props["subject"], "ContosoUniversity.Notification");
        assert_eq!(props["timeToLiveSeconds"], 86_400);

        let body = documents[0]["body"].as_str().unwrap();
        assert_eq!(codec::decode(body.as_bytes()).unwrap().entity_id(), "42");
    }

    #[tokio::test]
    async fn test_send_one_propagates_transport_failure() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        transport.set_available(false);
        let publisher = publisher(transport, 256 * 1024);

        let err = publisher.send_one(&notification("42")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        let publisher = publisher(transport.clone(), 256 * 1024);

        assert!(publisher.send_batch(&[]).await.unwrap().is_empty());
        assert_eq!(transport.queue_length(QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_oversized_batch_reports_failing_index() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        let unbounded = publisher(transport.clone(), usize::MAX);
        let one = unbounded
            .envelope(&notification("1"))
            .unwrap()
            .encoded_len()
            .unwrap();

        // Room for two envelopes, not three
        let publisher = publisher(transport.clone(), one * 2 + one / 2);
        let batch = vec![notification("1"), notification("2"), notification("3")];

        match publisher.send_batch(&batch).await {
            Err(PipelineError::BatchTooLarge { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected BatchTooLarge, got {other:?}"),
        }
        assert_eq!(transport.queue_length(QUEUE).await, 0);
    }
}
