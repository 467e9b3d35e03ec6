//! # Messaging Module
//!
//! Durable notification delivery: wire codec and envelope, the broker
//! transport seam (pgmq and in-memory), the publisher, and the
//! single-in-flight consumer.

pub mod codec;
pub mod envelope;
pub mod memory_transport;
#[cfg(feature = "postgres")]
pub mod pgmq_transport;
pub mod processor;
pub mod publisher;
pub mod transport;

pub use envelope::{MessageBatch, MessageEnvelope, MessageProperties};
pub use memory_transport::InMemoryTransport;
#[cfg(feature = "postgres")]
pub use pgmq_transport::PgmqTransport;
pub use processor::{
    LocalStoreHandler, LoggingHandler, MessageOutcome, NotificationHandler, NotificationProcessor,
    ProcessorConfig, ProcessorState, ProcessorStats,
};
pub use publisher::{NotificationPublisher, PublisherConfig};
pub use transport::{DeliveryContext, QueueTransport, ReceivedMessage};
