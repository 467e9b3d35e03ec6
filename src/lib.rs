#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, pgmq in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Notification Pipeline
//!
//! Records domain events ("entity X was created/updated/deleted") and delivers
//! them to observers.
//!
//! ## Overview
//!
//! Two delivery paths implement one [`NotificationSink`] capability:
//!
//! - **Local**: [`LocalNotificationStore`] appends synchronously in-process.
//!   Best effort; recording never fails the caller.
//! - **Durable**: [`NotificationPublisher`] sends to a queue and a
//!   [`NotificationProcessor`] consumes it with explicit acknowledgement.
//!   At-least-once; send failures reach the caller.
//!
//! ## Module Organization
//!
//! - [`models`] - Notification record, entity events, message generation
//! - [`messaging`] - Codec, envelope, transports, publisher, processor
//! - [`store`] - Local notification store
//! - [`sink`] - Sink capability and durable sink
//! - [`services`] - Dashboard-facing query and mark-as-read operations
//! - [`pipeline`] - Composition root
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use notification_pipeline::{EntityEvent, EntityOperation, LocalNotificationStore};
//!
//! let store = LocalNotificationStore::new();
//! store.record(EntityEvent::new("Student", "42", EntityOperation::Create));
//!
//! let recent = store.list(Some(10));
//! assert_eq!(recent[0].message(), "New Student (ID: 42) has been created");
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                   # in-memory transport only
//! TEST_DATABASE_URL=postgresql://... cargo test  # include pgmq tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod sink;
pub mod store;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use messaging::{
    DeliveryContext, InMemoryTransport, LocalStoreHandler, LoggingHandler, NotificationHandler,
    NotificationProcessor, NotificationPublisher, ProcessorState, ProcessorStats, QueueTransport,
};
#[cfg(feature = "postgres")]
pub use messaging::PgmqTransport;
pub use models::{EntityEvent, EntityOperation, Notification};
pub use pipeline::NotificationPipeline;
pub use services::{MarkReadResponse, NotificationService, NotificationsResponse};
pub use sink::{DurableNotificationSink, NotificationQuery, NotificationSink};
pub use store::LocalNotificationStore;
