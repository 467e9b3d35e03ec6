//! # Pipeline Constants
//!
//! Well-known names and defaults shared by the local store, the publisher and
//! the processor.

/// The single logical queue carrying notification traffic
pub const NOTIFICATION_QUEUE_NAME: &str = "notifications";

/// Envelope subject identifying a message as a notification
pub const NOTIFICATION_SUBJECT: &str = "ContosoUniversity.Notification";

/// Envelope content type for encoded notifications
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Actor recorded when the caller supplies none
pub const DEFAULT_CREATED_BY: &str = "System";

/// Broker time-to-live for unconsumed messages (24 hours)
pub const DEFAULT_TIME_TO_LIVE_SECONDS: u64 = 24 * 60 * 60;

/// Maximum encoded size of a single transport batch (256 KiB)
pub const DEFAULT_MAX_BATCH_SIZE_BYTES: usize = 256 * 1024;

/// How long a received message stays invisible before redelivery
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u32 = 30;

/// Processor idle/backoff poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Dashboard page size
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Default broker connection pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Deliveries after which a message that keeps failing is dead-lettered
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;
