//! # Message Envelope and Batches
//!
//! The envelope wraps an encoded notification with broker-facing metadata
//! (content type, subject, time-to-live and a producer-assigned message id).
//! [`MessageBatch`] packs envelopes up to a byte budget.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CONTENT_TYPE_JSON;
use crate::error::{PipelineError, Result};
use crate::messaging::codec;
use crate::models::Notification;

/// Broker-facing metadata attached to every notification message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    /// Producer-assigned id, stable across redeliveries
    pub message_id: Uuid,
    pub content_type: String,
    pub subject: String,
    pub time_to_live_seconds: u64,
}

impl MessageProperties {
    pub fn new(subject: impl Into<String>, time_to_live: Duration) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            subject: subject.into(),
            time_to_live_seconds: time_to_live.as_secs(),
        }
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_seconds)
    }

    /// Instant after which the broker drops the message unconsumed
    pub fn expires_at(&self, enqueued_at: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = i64::try_from(self.time_to_live_seconds).unwrap_or(i64::MAX);
        enqueued_at
            .checked_add_signed(chrono::Duration::seconds(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, enqueued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(enqueued_at)
    }
}

/// A notification as it travels through the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub properties: MessageProperties,
    /// UTF-8 JSON produced by [`codec::encode`]
    pub body: String,
}

impl MessageEnvelope {
    /// Encode a notification and wrap it with fresh metadata
    pub fn for_notification(
        notification: &Notification,
        subject: &str,
        time_to_live: Duration,
    ) -> Result<Self> {
        let body = String::from_utf8(codec::encode(notification)?).map_err(|e| {
            PipelineError::validation(format!("encoded notification is not UTF-8: {e}"))
        })?;

        Ok(Self {
            properties: MessageProperties::new(subject, time_to_live),
            body,
        })
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    /// JSON document stored by the broker
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Size counted against a batch budget
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// Byte-bounded set of envelopes submitted to the broker as one unit
#[derive(Debug, Clone)]
pub struct MessageBatch {
    max_size_bytes: usize,
    size_bytes: usize,
    envelopes: Vec<MessageEnvelope>,
}

impl MessageBatch {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            max_size_bytes,
            size_bytes: 0,
            envelopes: Vec::new(),
        }
    }

    /// Add an envelope if it fits in the remaining budget.
    ///
    /// Returns `Ok(false)` and leaves the batch untouched when it does not.
    pub fn try_add(&mut self, envelope: MessageEnvelope) -> Result<bool> {
        let len = envelope.encoded_len()?;
        if self.size_bytes + len > self.max_size_bytes {
            return Ok(false);
        }

        self.size_bytes += len;
        self.envelopes.push(envelope);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn envelopes(&self) -> &[MessageEnvelope] {
        &self.envelopes
    }
}
