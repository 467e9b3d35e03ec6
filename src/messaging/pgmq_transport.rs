//! # PGMQ Queue Transport
//!
//! Durable broker backed by the PostgreSQL `pgmq` extension.
//!
//! ## Settlement mapping
//!
//! - **complete**: `pgmq.delete` (permanent removal)
//! - **abandon**: `pgmq.set_vt(.., 0)` (visible again immediately)
//! - **dead_letter**: `pgmq.archive` (kept in the queue's archive table)
//! - **expiry**: messages older than their envelope TTL are archived on receive
//!   instead of being delivered
//! - **batch**: `pgmq.send_batch`, a single statement, so all or nothing

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pgmq::{types::Message, PGMQueue};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::messaging::envelope::{MessageBatch, MessageEnvelope};
use crate::messaging::transport::{QueueTransport, ReceivedMessage};

/// pgmq-backed implementation of [`QueueTransport`]
#[derive(Clone)]
pub struct PgmqTransport {
    pgmq: PGMQueue,
    /// Shared pool for raw SQL the pgmq crate does not wrap
    pool: PgPool,
}

impl std::fmt::Debug for PgmqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgmqTransport")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PgmqTransport {
    /// Connect using the broker connection string from a validated configuration
    pub async fn connect(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        info!("🚀 Connecting notification transport to pgmq");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.broker_connection_string)
            .await?;

        let transport = Self::new_with_pool(pool).await;

        info!("✅ Connected notification transport to pgmq");
        Ok(transport)
    }

    /// Create a transport over an existing pool (BYOP - Bring Your Own Pool)
    pub async fn new_with_pool(pool: PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool.clone()).await;
        Self { pgmq, pool }
    }

    /// Get reference to underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn into_received(message: Message<serde_json::Value>) -> ReceivedMessage {
        ReceivedMessage::from_document(
            message.msg_id,
            u32::try_from(message.read_ct).unwrap_or(0),
            message.enqueued_at,
            message.message,
        )
    }
}

fn vt_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl QueueTransport for PgmqTransport {
    #[instrument(skip(self), fields(queue = %queue_name))]
    async fn ensure_queue(&self, queue_name: &str) -> Result<()> {
        debug!("📋 Creating queue: {}", queue_name);
        self.pgmq.create(queue_name).await?;
        Ok(())
    }

    #[instrument(skip(self, envelope), fields(queue = %queue_name, message_id = %envelope.properties.message_id))]
    async fn send(&self, queue_name: &str, envelope: &MessageEnvelope) -> Result<i64> {
        let document = envelope.to_value()?;
        let msg_id = self.pgmq.send(queue_name, &document).await?;

        debug!(msg_id, "📤 Message sent to pgmq");
        Ok(msg_id)
    }

    #[instrument(skip(self, batch), fields(queue = %queue_name, count = batch.len()))]
    async fn send_batch(&self, queue_name: &str, batch: MessageBatch) -> Result<Vec<i64>> {
        let documents = batch
            .envelopes()
            .iter()
            .map(MessageEnvelope::to_value)
            .collect::<Result<Vec<_>>>()?;

        let msg_ids = self.pgmq.send_batch(queue_name, &documents).await?;

        debug!(sent = msg_ids.len(), "📤 Batch sent to pgmq");
        Ok(msg_ids)
    }

    #[instrument(skip(self), fields(queue = %queue_name))]
    async fn receive(
        &self,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ReceivedMessage>> {
        let vt = vt_seconds(visibility_timeout);

        loop {
            let Some(message) = self
                .pgmq
                .read::<serde_json::Value>(queue_name, Some(vt))
                .await?
            else {
                return Ok(None);
            };

            let received = Self::into_received(message);
            if !received.is_expired(Utc::now()) {
                return Ok(Some(received));
            }

            warn!(
                msg_id = received.msg_id,
                enqueued_at = %received.enqueued_at,
                "Archiving expired message"
            );
            self.pgmq.archive(queue_name, received.msg_id).await?;
        }
    }

    #[instrument(skip(self), fields(queue = %queue_name, msg_id = msg_id))]
    async fn complete(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        let deleted = self.pgmq.delete(queue_name, msg_id).await?;
        if deleted == 0 {
            return Err(PipelineError::transport(format!(
                "message {msg_id} no longer present in queue {queue_name}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %queue_name, msg_id = msg_id))]
    async fn abandon(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        let updated = sqlx::query("SELECT msg_id FROM pgmq.set_vt($1::text, $2::bigint, 0)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_optional(&self.pool)
            .await?;

        if updated.is_none() {
            return Err(PipelineError::transport(format!(
                "message {msg_id} no longer present in queue {queue_name}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %queue_name, msg_id = msg_id))]
    async fn dead_letter(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        self.pgmq.archive(queue_name, msg_id).await?;
        warn!("🪦 Message archived as dead letter");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("pgmq health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::MessageProperties;

    #[test]
    fn test_vt_seconds_saturates() {
        assert_eq!(vt_seconds(Duration::from_secs(30)), 30);
        assert_eq!(vt_seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[tokio::test]
    async fn test_pgmq_send_receive_complete() {
        // Requires PostgreSQL with the pgmq extension
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping pgmq test - no TEST_DATABASE_URL provided");
            return;
        };

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to create connection pool");
        let transport = PgmqTransport::new_with_pool(pool).await;
        let queue = "notification_transport_test";

        transport.ensure_queue(queue).await.unwrap();

        let envelope = MessageEnvelope {
            properties: MessageProperties::new("test", Duration::from_secs(60)),
            body: "{}".to_string(),
        };
        let msg_id = transport.send(queue, &envelope).await.unwrap();

        let received = transport
            .receive(queue, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message should be readable");
        assert_eq!(received.msg_id, msg_id);

        transport.abandon(queue, msg_id).await.unwrap();
        let again = transport
            .receive(queue, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("abandoned message should be readable again");
        assert_eq!(again.delivery_count, 2);

        transport.complete(queue, msg_id).await.unwrap();
        assert!(transport
            .receive(queue, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        let poison = transport.send(queue, &envelope).await.unwrap();
        transport
            .receive(queue, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("message should be readable");
        transport.dead_letter(queue, poison).await.unwrap();
        transport.abandon(queue, poison).await.unwrap_err();

        assert!(transport.health_check().await.unwrap());
    }
}
