//! # Notification Pipeline
//!
//! Composition root. Validates configuration up front, then wires one
//! transport, one local store and one publisher into services and processors.
//!
//! ```rust,no_run
//! use notification_pipeline::{EntityEvent, EntityOperation, NotificationPipeline, PipelineConfig};
//!
//! # async fn example() -> notification_pipeline::Result<()> {
//! let config = PipelineConfig::load(None)?;
//! let pipeline = NotificationPipeline::connect(config).await?;
//!
//! let processor = pipeline.store_processor();
//! processor.start().await?;
//!
//! let service = pipeline.durable_service();
//! service
//!     .send_notification(EntityEvent::new("Student", "42", EntityOperation::Create))
//!     .await?;
//!
//! processor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::messaging::processor::{
    LocalStoreHandler, NotificationHandler, NotificationProcessor, ProcessorConfig,
};
use crate::messaging::publisher::{NotificationPublisher, PublisherConfig};
use crate::messaging::transport::QueueTransport;
use crate::services::NotificationService;
use crate::sink::DurableNotificationSink;
use crate::store::LocalNotificationStore;

#[derive(Debug, Clone)]
pub struct NotificationPipeline {
    config: PipelineConfig,
    transport: Arc<dyn QueueTransport>,
    store: Arc<LocalNotificationStore>,
    publisher: NotificationPublisher,
}

impl NotificationPipeline {
    /// Validate `config` and connect the pgmq transport
    #[cfg(feature = "postgres")]
    pub async fn connect(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let transport = crate::messaging::pgmq_transport::PgmqTransport::connect(&config).await?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Validate `config` and build over an existing transport
    pub fn with_transport(
        config: PipelineConfig,
        transport: Arc<dyn QueueTransport>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            provider = transport.provider_name(),
            config = ?config.sanitized(),
            "Notification pipeline configured"
        );

        let publisher = NotificationPublisher::new(
            Arc::clone(&transport),
            PublisherConfig::from(&config),
        );

        Ok(Self {
            config,
            transport,
            store: Arc::new(LocalNotificationStore::new()),
            publisher,
        })
    }

    /// Replace the local store, e.g. one with a custom clock or audit hook
    pub fn with_store(mut self, store: Arc<LocalNotificationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn QueueTransport> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<LocalNotificationStore> {
        &self.store
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    /// Create the notification queue if missing
    pub async fn ensure_queue(&self) -> Result<()> {
        self.transport.ensure_queue(&self.config.queue_name).await
    }

    /// Best-effort service recording straight into the local store
    pub fn local_service(&self) -> NotificationService {
        NotificationService::new(self.store.clone())
            .with_default_limit(self.config.default_list_limit)
    }

    /// Durable service publishing to the queue, answering queries from the
    /// local store
    pub fn durable_service(&self) -> NotificationService {
        NotificationService::new(Arc::new(DurableNotificationSink::new(self.publisher.clone())))
            .with_store(Arc::clone(&self.store))
            .with_default_limit(self.config.default_list_limit)
    }

    /// Processor driving an arbitrary handler
    pub fn processor(&self, handler: Arc<dyn NotificationHandler>) -> NotificationProcessor {
        NotificationProcessor::new(
            Arc::clone(&self.transport),
            handler,
            ProcessorConfig::from(&self.config),
        )
    }

    /// Processor that feeds consumed notifications into the local store
    pub fn store_processor(&self) -> NotificationProcessor {
        self.processor(Arc::new(LocalStoreHandler::new(Arc::clone(&self.store))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::messaging::memory_transport::InMemoryTransport;

    #[test]
    fn test_construction_requires_credentials() {
        let transport: Arc<dyn QueueTransport> = Arc::new(InMemoryTransport::new());
        let err = NotificationPipeline::with_transport(PipelineConfig::default(), transport)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_services_share_the_store() {
        let transport: Arc<dyn QueueTransport> = Arc::new(InMemoryTransport::new());
        let pipeline = NotificationPipeline::with_transport(
            PipelineConfig::new("memory://", "memory://"),
            transport,
        )
        .unwrap();
        pipeline.ensure_queue().await.unwrap();

        assert_eq!(pipeline.local_service().sink_name(), "local");
        assert_eq!(pipeline.durable_service().sink_name(), "durable");
        assert!(pipeline.durable_service().get_notifications(None).success);
    }
}
