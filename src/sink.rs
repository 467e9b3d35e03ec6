//! # Notification Sinks
//!
//! One capability, two reliability contracts, chosen when the pipeline is
//! composed:
//!
//! | Sink | Delivery | On failure |
//! |------|----------|------------|
//! | [`LocalNotificationStore`] | synchronous, in-process | logged and swallowed, `Ok(None)` |
//! | [`DurableNotificationSink`] | queue-backed, at-least-once | logged and returned as `Err` |
//!
//! Sinks that can also be queried (the local store) expose a
//! [`NotificationQuery`] through [`NotificationSink::query`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::error::Result;
use crate::messaging::publisher::NotificationPublisher;
use crate::models::{EntityEvent, Notification};
use crate::store::LocalNotificationStore;

/// Accepts entity-operation events for delivery
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    /// Submit an event.
    ///
    /// `Ok(Some(_))` carries the stored notification when the sink assigns
    /// local ids; `Ok(None)` means the event was not stored (local policy) or
    /// was handed to a broker.
    async fn submit(&self, event: EntityEvent) -> Result<Option<Notification>>;

    /// Short name for logs ("local", "durable")
    fn name(&self) -> &'static str;

    /// Query access, for sinks that keep what they accept
    fn query(&self) -> Option<&dyn NotificationQuery> {
        None
    }
}

/// Read and mark-as-read access to stored notifications
pub trait NotificationQuery: Send + Sync {
    fn list(&self, limit: Option<usize>) -> Vec<Notification>;
    fn mark_read(&self, id: i64) -> bool;
    fn first_unread(&self) -> Option<Notification>;
}

impl NotificationQuery for LocalNotificationStore {
    fn list(&self, limit: Option<usize>) -> Vec<Notification> {
        LocalNotificationStore::list(self, limit)
    }

    fn mark_read(&self, id: i64) -> bool {
        LocalNotificationStore::mark_read(self, id)
    }

    fn first_unread(&self) -> Option<Notification> {
        LocalNotificationStore::first_unread(self)
    }
}

#[async_trait]
impl NotificationSink for LocalNotificationStore {
    async fn submit(&self, event: EntityEvent) -> Result<Option<Notification>> {
        Ok(self.record(event))
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn query(&self) -> Option<&dyn NotificationQuery> {
        Some(self)
    }
}

#[async_trait]
impl<T: NotificationSink> NotificationSink for Arc<T> {
    async fn submit(&self, event: EntityEvent) -> Result<Option<Notification>> {
        (**self).submit(event).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn query(&self) -> Option<&dyn NotificationQuery> {
        (**self).query()
    }
}

/// Publishes each event to the durable queue.
///
/// Notification ids are left unassigned; the broker message id is only
/// logged.
#[derive(Debug, Clone)]
pub struct DurableNotificationSink {
    publisher: NotificationPublisher,
}

impl DurableNotificationSink {
    pub fn new(publisher: NotificationPublisher) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    /// Build and publish a notification stamped with `created_at`
    pub async fn submit_at(
        &self,
        event: EntityEvent,
        created_at: DateTime<Utc>,
    ) -> Result<Notification> {
        let notification = Notification::from_event(event, created_at)?;
        self.publisher.send_one(&notification).await?;
        Ok(notification)
    }
}

#[async_trait]
impl NotificationSink for DurableNotificationSink {
    #[instrument(skip(self, event), fields(entity_type = %event.entity_type, entity_id = %event.entity_id))]
    async fn submit(&self, event: EntityEvent) -> Result<Option<Notification>> {
        self.submit_at(event, Utc::now()).await?;
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "durable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::messaging::memory_transport::InMemoryTransport;
    use crate::messaging::publisher::PublisherConfig;
    use crate::models::EntityOperation;

    fn event() -> EntityEvent {
        EntityEvent::new("Course", "CS101", EntityOperation::Create).with_display_name("Databases")
    }

    #[tokio::test]
    async fn test_local_sink_swallows_faults() {
        let store = LocalNotificationStore::new();
        let bad = EntityEvent::new("", "1", EntityOperation::Create);

        assert!(store.submit(bad).await.unwrap().is_none());
        assert!(store.submit(event()).await.unwrap().is_some());
        assert_eq!(store.query().unwrap().list(None).len(), 1);
    }

    #[tokio::test]
    async fn test_durable_sink_propagates_faults() {
        let transport = Arc::new(InMemoryTransport::with_queues(&["notifications"]));
        let sink = DurableNotificationSink::new(NotificationPublisher::new(
            transport.clone(),
            PublisherConfig::default(),
        ));
        assert!(sink.query().is_none());

        assert!(sink.submit(event()).await.unwrap().is_none());
        assert_eq!(transport.queue_length("notifications").await, 1);

        transport.set_available(false);
        let err = sink.submit(event()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport { .. }));
    }
}
