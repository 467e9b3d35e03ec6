//! # In-Memory Queue Transport
//!
//! Thread-safe in-process broker for tests, development, and single-process
//! deployments.
//!
//! ## Features
//!
//! - **Visibility Timeout**: Messages become invisible after receive, re-visible after timeout
//! - **Explicit Settlement**: `complete` removes, `abandon` re-exposes immediately,
//!   `dead_letter` moves the message to a per-queue dead-letter list
//! - **TTL Expiry**: Expired messages are dropped instead of delivered
//! - **Outage Simulation**: `set_available(false)` fails every operation with a transport error

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::messaging::envelope::{MessageBatch, MessageEnvelope};
use crate::messaging::transport::{QueueTransport, ReceivedMessage};

/// In-memory message with visibility tracking
#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    document: serde_json::Value,
    enqueued_at: DateTime<Utc>,
    /// Broker-side expiry from the envelope TTL (None = never)
    expires_at: Option<DateTime<Utc>>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn as_received(&self) -> ReceivedMessage {
        ReceivedMessage::from_document(
            self.id,
            self.receive_count,
            self.enqueued_at,
            self.document.clone(),
        )
    }
}

#[derive(Debug)]
struct InMemoryQueue {
    /// Messages in the queue (FIFO order)
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    next_id: i64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letters: Vec::new(),
            next_id: 1,
        }
    }

    fn push(
        &mut self,
        document: serde_json::Value,
        enqueued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push_back(StoredMessage {
            id,
            document,
            enqueued_at,
            expires_at,
            visible_at: None,
            receive_count: 0,
        });
        id
    }

    fn take(&mut self, queue_name: &str, msg_id: i64) -> Result<StoredMessage> {
        let pos = self
            .messages
            .iter()
            .position(|m| m.id == msg_id)
            .ok_or_else(|| message_not_found(queue_name, msg_id))?;
        self.messages
            .remove(pos)
            .ok_or_else(|| message_not_found(queue_name, msg_id))
    }
}

/// In-process broker implementing [`QueueTransport`]
#[derive(Debug)]
pub struct InMemoryTransport {
    /// Queue storage (queue_name -> queue)
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    available: AtomicBool,
    expired_count: AtomicU64,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Create with pre-initialized queues
    pub fn with_queues(queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| (name.to_string(), InMemoryQueue::new()))
            .collect();
        Self {
            queues: RwLock::new(queues),
            available: AtomicBool::new(true),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Simulate a broker outage (false) or recovery (true)
    pub fn set_available(&self, available: bool) {
        info!(available, "In-memory broker availability changed");
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of messages in a queue, visible or not (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Stored documents in FIFO order (for testing)
    pub async fn pending_documents(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().map(|m| m.document.clone()).collect())
            .unwrap_or_default()
    }

    /// Dead-lettered documents in the order they were set aside (for testing)
    pub async fn dead_letter_documents(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.dead_letters.iter().map(|m| m.document.clone()).collect())
            .unwrap_or_default()
    }

    /// Enqueue an arbitrary document, bypassing the envelope (for testing)
    pub async fn push_raw(&self, queue_name: &str, document: serde_json::Value) -> Result<i64> {
        self.check_available()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;
        Ok(queue.push(document, Utc::now(), None))
    }

    /// Messages dropped because their time-to-live lapsed
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::transport("in-memory broker is unavailable"))
        }
    }
}

fn queue_not_found(queue_name: &str) -> PipelineError {
    PipelineError::transport(format!("queue not found: {queue_name}"))
}

fn message_not_found(queue_name: &str, msg_id: i64) -> PipelineError {
    PipelineError::transport(format!("message {msg_id} not found in queue {queue_name}"))
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        self.check_available()?;
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn send(&self, queue_name: &str, envelope: &MessageEnvelope) -> Result<i64> {
        self.check_available()?;
        let document = envelope.to_value()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        let now = Utc::now();
        Ok(queue.push(document, now, Some(envelope.properties.expires_at(now))))
    }

    async fn send_batch(&self, queue_name: &str, batch: MessageBatch) -> Result<Vec<i64>> {
        self.check_available()?;

        // Serialize everything before touching the queue so a failure leaves it unchanged
        let now = Utc::now();
        let documents = batch
            .envelopes()
            .iter()
            .map(|envelope| Ok((envelope.to_value()?, envelope.properties.expires_at(now))))
            .collect::<Result<Vec<_>>>()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        Ok(documents
            .into_iter()
            .map(|(document, expires_at)| queue.push(document, now, Some(expires_at)))
            .collect())
    }

    async fn receive(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>> {
        self.check_available()?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        let now = Utc::now();
        let before = queue.messages.len();
        queue.messages.retain(|msg| !msg.is_expired(now));
        let expired = before - queue.messages.len();
        if expired > 0 {
            self.expired_count
                .fetch_add(expired as u64, Ordering::Relaxed);
            debug!(queue = %queue_name, expired, "Dropped expired messages");
        }

        let visible_until = now
            + chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| PipelineError::config(format!("invalid visibility timeout: {e}")))?;

        let next = queue
            .messages
            .iter_mut()
            .find(|msg| msg.visible_at.map(|vt| vt <= now).unwrap_or(true));

        Ok(next.map(|msg| {
            msg.visible_at = Some(visible_until);
            msg.receive_count += 1;
            msg.as_received()
        }))
    }

    async fn complete(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        self.check_available()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        queue.take(queue_name, msg_id)?;
        Ok(())
    }

    async fn abandon(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        self.check_available()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        let msg = queue
            .messages
            .iter_mut()
            .find(|m| m.id == msg_id)
            .ok_or_else(|| message_not_found(queue_name, msg_id))?;
        msg.visible_at = None;
        Ok(())
    }

    async fn dead_letter(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        self.check_available()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| queue_not_found(queue_name))?;

        let msg = queue.take(queue_name, msg_id)?;
        debug!(
            queue = %queue_name,
            msg_id,
            receive_count = msg.receive_count,
            "Dead-lettered message"
        );
        queue.dead_letters.push(msg);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
