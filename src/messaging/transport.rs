//! # Queue Transport Trait
//!
//! Broker-agnostic seam between the publisher/processor and a durable queue.
//!
//! Implementations must provide:
//!
//! - Idempotent queue creation
//! - Single and atomic batch sends
//! - Receive with a visibility timeout (a received message is hidden from
//!   other consumers until it is completed, abandoned, or the timeout lapses)
//! - Explicit settlement: `complete` removes the message, `abandon` makes it
//!   visible again for redelivery, `dead_letter` sets it aside for good
//! - Time-to-live expiry: messages older than their envelope TTL are dropped
//!   by the broker rather than delivered

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::messaging::envelope::{MessageBatch, MessageEnvelope, MessageProperties};

/// Durable queue operations used by the notification pipeline
#[async_trait]
pub trait QueueTransport: Send + Sync + std::fmt::Debug + 'static {
    /// Create the queue if it doesn't exist
    async fn ensure_queue(&self, queue_name: &str) -> Result<()>;

    /// Send one envelope, returning the broker-assigned message id
    async fn send(&self, queue_name: &str, envelope: &MessageEnvelope) -> Result<i64>;

    /// Send every envelope in the batch as one unit.
    ///
    /// Either all messages become visible on the queue or none do.
    async fn send_batch(&self, queue_name: &str, batch: MessageBatch) -> Result<Vec<i64>>;

    /// Receive the next visible, unexpired message, if any
    async fn receive(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>>;

    /// Acknowledge a message, removing it permanently
    async fn complete(&self, queue_name: &str, msg_id: i64) -> Result<()>;

    /// Return a message to the queue for immediate redelivery
    async fn abandon(&self, queue_name: &str, msg_id: i64) -> Result<()>;

    /// Take a message out of delivery permanently, keeping it for inspection
    async fn dead_letter(&self, queue_name: &str, msg_id: i64) -> Result<()>;

    /// Whether the broker is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging ("pgmq", "in_memory")
    fn provider_name(&self) -> &'static str;
}

/// A message handed out by [`QueueTransport::receive`]
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Broker sequence id, used for settlement
    pub msg_id: i64,
    /// How many times this message has been handed out, including this one
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Envelope metadata; `None` when the stored document was not an envelope
    pub properties: Option<MessageProperties>,
    /// Raw notification payload
    pub body: Vec<u8>,
}

impl ReceivedMessage {
    /// Interpret a stored broker document.
    ///
    /// Documents that are not envelopes are passed through as the raw body so the
    /// processor can still attempt to decode them.
    pub fn from_document(
        msg_id: i64,
        delivery_count: u32,
        enqueued_at: DateTime<Utc>,
        document: serde_json::Value,
    ) -> Self {
        match serde_json::from_value::<MessageEnvelope>(document.clone()) {
            Ok(envelope) => Self {
                msg_id,
                delivery_count,
                enqueued_at,
                properties: Some(envelope.properties),
                body: envelope.body.into_bytes(),
            },
            Err(_) => Self {
                msg_id,
                delivery_count,
                enqueued_at,
                properties: None,
                body: serde_json::to_vec(&document).unwrap_or_default(),
            },
        }
    }

    /// Whether the envelope TTL has lapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.is_expired(self.enqueued_at, now))
    }

    pub fn delivery_context(&self, queue_name: &str) -> DeliveryContext {
        DeliveryContext {
            queue_name: queue_name.to_string(),
            msg_id: self.msg_id,
            message_id: self.properties.as_ref().map(|p| p.message_id),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Delivery metadata passed to message handlers alongside the notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub queue_name: String,
    pub msg_id: i64,
    /// Producer-assigned id; the same on every redelivery of a message
    pub message_id: Option<Uuid>,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl DeliveryContext {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
