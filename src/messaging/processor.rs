//! # Notification Processor
//!
//! Long-running consumer for the notification queue.
//!
//! ## Lifecycle
//!
//! `Stopped → Starting → Running → Stopping → Stopped`. While running, one
//! background task pulls messages and handles them one at a time:
//!
//! 1. **Receive** with the configured visibility timeout
//! 2. **Decode** the payload
//! 3. **Handle** through the registered [`NotificationHandler`]
//! 4. **Complete** on success, **abandon** on any decode or handler fault
//!
//! A message that fails on its `max_delivery_count`-th delivery is
//! dead-lettered instead of abandoned, so it cannot hold up the queue.
//!
//! Acknowledgement only happens after the handler returns. A handler may see
//! the same message more than once (at-least-once delivery), so handlers must
//! be idempotent; [`DeliveryContext::message_id`] is stable across redeliveries.
//!
//! Transport faults (receive or settlement) go to
//! [`NotificationHandler::handle_transport_error`] and never stop the loop.
//! `stop()` signals the loop between messages and waits for the message in
//! flight to be settled before returning.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::logging::log_error;
use crate::messaging::codec;
use crate::messaging::transport::{DeliveryContext, QueueTransport, ReceivedMessage};
use crate::models::Notification;
use crate::store::{panic_message, LocalNotificationStore};

/// Callback invoked for every decoded notification
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    /// Process one notification. `Err` (or a panic) abandons the message for redelivery.
    async fn handle(
        &self,
        notification: &Notification,
        context: &DeliveryContext,
    ) -> anyhow::Result<()>;

    /// Called for receive and settlement faults; the processor keeps running
    async fn handle_transport_error(&self, error: &PipelineError) {
        warn!(error = %error, "Notification processor transport error");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Settlement decision for one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Acknowledged,
    Abandoned,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub queue_name: String,
    pub visibility_timeout: Duration,
    /// Sleep between empty receives and after a failure
    pub poll_interval: Duration,
    /// Deliveries a failing message gets before it is dead-lettered
    pub max_delivery_count: u32,
}

impl From<&PipelineConfig> for ProcessorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            queue_name: config.queue_name.clone(),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
            max_delivery_count: config.max_delivery_count,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

/// Point-in-time processor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub received: u64,
    pub acknowledged: u64,
    pub abandoned: u64,
    pub dead_lettered: u64,
    pub decode_failures: u64,
    pub handler_faults: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    received: AtomicU64,
    acknowledged: AtomicU64,
    abandoned: AtomicU64,
    dead_lettered: AtomicU64,
    decode_failures: AtomicU64,
    handler_faults: AtomicU64,
    transport_errors: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct NotificationProcessor {
    processor_id: Uuid,
    config: ProcessorConfig,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn NotificationHandler>,
    stats: Arc<StatsCounters>,
    state: Arc<RwLock<ProcessorState>>,
    /// Also serializes `start` and `stop`
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for NotificationProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationProcessor")
            .field("processor_id", &self.processor_id)
            .field("config", &self.config)
            .field("transport", &self.transport.provider_name())
            .field("state", &*self.state.read())
            .finish()
    }
}

impl NotificationProcessor {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn NotificationHandler>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            processor_id: Uuid::new_v4(),
            config,
            transport,
            handler,
            stats: Arc::new(StatsCounters::default()),
            state: Arc::new(RwLock::new(ProcessorState::Stopped)),
            worker: Mutex::new(None),
        }
    }

    pub fn processor_id(&self) -> Uuid {
        self.processor_id
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.read()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.snapshot()
    }

    /// Begin pulling from the queue in a background task.
    ///
    /// Fails with `InvalidState` unless the processor is stopped, and with the
    /// transport's error if the queue cannot be created.
    #[instrument(skip(self), fields(processor_id = %self.processor_id, queue = %self.config.queue_name))]
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;

        {
            let mut state = self.state.write();
            if *state != ProcessorState::Stopped {
                return Err(PipelineError::invalid_state(format!(
                    "processor cannot start while {state}"
                )));
            }
            *state = ProcessorState::Starting;
        }

        if let Err(e) = self.transport.ensure_queue(&self.config.queue_name).await {
            error!(error = %e, "Failed to prepare notification queue");
            *self.state.write() = ProcessorState::Stopped;
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let processing = ProcessingLoop {
            processor_id: self.processor_id,
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            handler: Arc::clone(&self.handler),
            stats: Arc::clone(&self.stats),
        };

        *self.state.write() = ProcessorState::Running;
        let handle = tokio::spawn(processing.run(shutdown_rx));
        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });

        info!(
            provider = self.transport.provider_name(),
            "🚀 Notification processor started"
        );
        Ok(())
    }

    /// Signal the loop, wait for the in-flight message to settle, then stop.
    ///
    /// A no-op when already stopped.
    #[instrument(skip(self), fields(processor_id = %self.processor_id))]
    pub async fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        let Some(Worker {
            shutdown_tx,
            handle,
        }) = worker.take()
        else {
            debug!("Notification processor already stopped");
            return Ok(());
        };

        *self.state.write() = ProcessorState::Stopping;
        // The loop may already have exited; a closed channel is fine
        let _ = shutdown_tx.send(());

        if let Err(e) = handle.await {
            error!(error = %e, "Notification processing task ended abnormally");
        }

        *self.state.write() = ProcessorState::Stopped;
        info!(stats = ?self.stats(), "🛑 Notification processor stopped");
        Ok(())
    }
}

/// State moved into the background task
struct ProcessingLoop {
    processor_id: Uuid,
    config: ProcessorConfig,
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn NotificationHandler>,
    stats: Arc<StatsCounters>,
}

impl ProcessingLoop {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        debug!(processor_id = %self.processor_id, "Notification processing loop running");

        loop {
            if !matches!(
                shutdown_rx.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            ) {
                break;
            }

            let received = self
                .transport
                .receive(&self.config.queue_name, self.config.visibility_timeout)
                .await;

            let backoff = match received {
                Ok(Some(message)) => self.process(message).await == MessageOutcome::Abandoned,
                Ok(None) => true,
                Err(e) => {
                    self.on_transport_error("receive", &e).await;
                    true
                }
            };

            if backoff && self.wait_for_shutdown(&mut shutdown_rx).await {
                break;
            }
        }

        debug!(processor_id = %self.processor_id, "Notification processing loop exited");
    }

    /// Sleep one poll interval; true if shutdown was signalled meanwhile
    async fn wait_for_shutdown(&self, shutdown_rx: &mut oneshot::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown_rx => true,
            () = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    #[instrument(skip(self, message), fields(processor_id = %self.processor_id, msg_id = message.msg_id, delivery_count = message.delivery_count))]
    async fn process(&self, message: ReceivedMessage) -> MessageOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let context = message.delivery_context(&self.config.queue_name);

        match self.dispatch(&message, &context).await {
            Ok(()) => {
                match self
                    .transport
                    .complete(&self.config.queue_name, message.msg_id)
                    .await
                {
                    Ok(()) => {
                        self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                        debug!("Notification acknowledged");
                    }
                    // Visibility timeout will redeliver it
                    Err(e) => self.on_transport_error("complete", &e).await,
                }
                MessageOutcome::Acknowledged
            }
            Err(fault) => {
                log_error(
                    "notification_processor",
                    "process",
                    &fault.to_string(),
                    Some(&format!("msg_id={}", message.msg_id)),
                );

                if message.delivery_count >= self.config.max_delivery_count {
                    return self.dead_letter(&message, &fault).await;
                }

                warn!(error = %fault, kind = fault.kind(), "Abandoning notification message");
                match self
                    .transport
                    .abandon(&self.config.queue_name, message.msg_id)
                    .await
                {
                    Ok(()) => {
                        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => self.on_transport_error("abandon", &e).await,
                }
                MessageOutcome::Abandoned
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &ReceivedMessage,
        fault: &PipelineError,
    ) -> MessageOutcome {
        error!(
            error = %fault,
            kind = fault.kind(),
            max_delivery_count = self.config.max_delivery_count,
            "Delivery limit reached, dead-lettering notification message"
        );

        match self
            .transport
            .dead_letter(&self.config.queue_name, message.msg_id)
            .await
        {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::DeadLettered
            }
            Err(e) => {
                self.on_transport_error("dead_letter", &e).await;
                MessageOutcome::Abandoned
            }
        }
    }

    async fn dispatch(&self, message: &ReceivedMessage, context: &DeliveryContext) -> Result<()> {
        let notification = codec::decode(&message.body).inspect_err(|_| {
            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
        })?;

        debug!(
            entity_type = %notification.entity_type(),
            entity_id = %notification.entity_id(),
            operation = %notification.operation(),
            "Processing notification"
        );

        let handled = AssertUnwindSafe(self.handler.handle(&notification, context))
            .catch_unwind()
            .await;

        let fault = match handled {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => PipelineError::handler_fault(format!("{e:#}")),
            Err(payload) => PipelineError::handler_fault(panic_message(payload.as_ref())),
        };
        self.stats.handler_faults.fetch_add(1, Ordering::Relaxed);
        Err(fault)
    }

    async fn on_transport_error(&self, operation: &str, error: &PipelineError) {
        self.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
        debug!(operation, error = %error, "Transport operation failed");
        self.handler.handle_transport_error(error).await;
    }
}

/// Logs each notification and acknowledges it
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl NotificationHandler for LoggingHandler {
    async fn handle(
        &self,
        notification: &Notification,
        context: &DeliveryContext,
    ) -> anyhow::Result<()> {
        info!(
            msg_id = context.msg_id,
            entity_type = %notification.entity_type(),
            entity_id = %notification.entity_id(),
            operation = %notification.operation(),
            message = %notification.message(),
            "Processed notification"
        );
        Ok(())
    }
}

/// Forwards consumed notifications into a local store.
///
/// Redeliveries of a message already stored are acknowledged without storing
/// it twice.
#[derive(Debug)]
pub struct LocalStoreHandler {
    store: Arc<LocalNotificationStore>,
    /// message_id -> local id
    seen: DashMap<Uuid, i64>,
}

impl LocalStoreHandler {
    pub fn new(store: Arc<LocalNotificationStore>) -> Self {
        Self {
            store,
            seen: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<LocalNotificationStore> {
        &self.store
    }
}

#[async_trait]
impl NotificationHandler for LocalStoreHandler {
    async fn handle(
        &self,
        notification: &Notification,
        context: &DeliveryContext,
    ) -> anyhow::Result<()> {
        if let Some(message_id) = context.message_id {
            if let Some(local_id) = self.seen.get(&message_id) {
                debug!(
                    %message_id,
                    notification_id = *local_id,
                    "Duplicate delivery already stored"
                );
                return Ok(());
            }
        }

        let stored = self
            .store
            .append(notification.clone())
            .ok_or_else(|| anyhow::anyhow!("local store rejected notification"))?;

        if let (Some(message_id), Some(local_id)) = (context.message_id, stored.id()) {
            self.seen.insert(message_id, local_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::MessageEnvelope;
    use crate::messaging::memory_transport::InMemoryTransport;
    use crate::models::{EntityEvent, EntityOperation};
    use chrono::Utc;

    const QUEUE: &str = "notifications";

    fn config() -> ProcessorConfig {
        ProcessorConfig {
            queue_name: QUEUE.to_string(),
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            max_delivery_count: 3,
        }
    }

    async fn enqueue(transport: &InMemoryTransport, entity_id: &str) {
        let event = EntityEvent::new("Course", entity_id, EntityOperation::Update);
        let notification = Notification::from_event(event, Utc::now()).unwrap();
        let envelope =
            MessageEnvelope::for_notification(&notification, "test", Duration::from_secs(60))
                .unwrap();
        transport.send(QUEUE, &envelope).await.unwrap();
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    struct PanickingHandler;

    #[async_trait]
    impl NotificationHandler for PanickingHandler {
        async fn handle(&self, _: &Notification, _: &DeliveryContext) -> anyhow::Result<()> {
            panic!("handler blew up")
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let transport = Arc::new(InMemoryTransport::new());
        let processor = NotificationProcessor::new(transport, Arc::new(LoggingHandler), config());

        processor.start().await.unwrap();
        assert_eq!(processor.state(), ProcessorState::Running);

        let err = processor.start().await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));

        processor.stop().await.unwrap();
        processor.stop().await.unwrap();
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_successful_message_is_acknowledged() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        enqueue(&transport, "1").await;

        let processor =
            NotificationProcessor::new(transport.clone(), Arc::new(LoggingHandler), config());
        processor.start().await.unwrap();
        wait_until(|| processor.stats().acknowledged == 1).await;
        processor.stop().await.unwrap();

        assert_eq!(transport.queue_length(QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_dead_lettered_after_retries() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        transport
            .push_raw(QUEUE, serde_json::json!({"not": "a notification"}))
            .await
            .unwrap();

        let processor =
            NotificationProcessor::new(transport.clone(), Arc::new(LoggingHandler), config());
        processor.start().await.unwrap();
        wait_until(|| processor.stats().dead_lettered == 1).await;
        processor.stop().await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.decode_failures, 3);
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.acknowledged, 0);
        assert_eq!(transport.queue_length(QUEUE).await, 0);
        assert_eq!(transport.dead_letter_documents(QUEUE).await.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let transport = Arc::new(InMemoryTransport::with_queues(&[QUEUE]));
        enqueue(&transport, "1").await;

        let processor =
            NotificationProcessor::new(transport.clone(), Arc::new(PanickingHandler), config());
        processor.start().await.unwrap();
        wait_until(|| processor.stats().dead_lettered == 1).await;
        assert_eq!(processor.state(), ProcessorState::Running);
        processor.stop().await.unwrap();

        assert_eq!(processor.stats().handler_faults, 3);
        assert_eq!(transport.queue_length(QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_local_store_handler_skips_duplicates() {
        let store = Arc::new(LocalNotificationStore::new());
        let handler = LocalStoreHandler::new(store.clone());

        let event = EntityEvent::new("Student", "9", EntityOperation::Delete);
        let notification = Notification::from_event(event, Utc::now()).unwrap();
        let context = DeliveryContext {
            queue_name: QUEUE.to_string(),
            msg_id: 1,
            message_id: Some(Uuid::new_v4()),
            delivery_count: 1,
            enqueued_at: Utc::now(),
        };

        handler.handle(&notification, &context).await.unwrap();
        let redelivery = DeliveryContext {
            delivery_count: 2,
            ..context
        };
        handler.handle(&notification, &redelivery).await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
