//! # Pipeline Configuration
//!
//! Connection credentials and tuning knobs for the notification pipeline.
//!
//! Values are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `NOTIFY_*` environment variables
//! (`NOTIFY_BROKER_CONNECTION_STRING`, `NOTIFY_QUEUE_NAME`, ...). Loading
//! validates eagerly; a configuration that is missing either connection string
//! never produces a pipeline.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_LIST_LIMIT, DEFAULT_MAX_BATCH_SIZE_BYTES, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_DELIVERY_COUNT, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIME_TO_LIVE_SECONDS,
    DEFAULT_VISIBILITY_TIMEOUT_SECONDS, NOTIFICATION_QUEUE_NAME, NOTIFICATION_SUBJECT,
};
use crate::error::{PipelineError, Result};

const ENV_PREFIX: &str = "NOTIFY";
const MASK: &str = "***";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Broker credential (a PostgreSQL URL for the pgmq transport)
    pub broker_connection_string: String,
    /// File-storage credential; unused by the pipeline but required to be present
    pub storage_connection_string: String,
    pub queue_name: String,
    /// Logical type tag attached to every envelope
    pub subject: String,
    pub time_to_live_seconds: u64,
    pub max_batch_size_bytes: usize,
    pub visibility_timeout_seconds: u32,
    pub poll_interval_ms: u64,
    /// Deliveries a failing message gets before it is dead-lettered
    pub max_delivery_count: u32,
    pub max_connections: u32,
    pub default_list_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker_connection_string: String::new(),
            storage_connection_string: String::new(),
            queue_name: NOTIFICATION_QUEUE_NAME.to_string(),
            subject: NOTIFICATION_SUBJECT.to_string(),
            time_to_live_seconds: DEFAULT_TIME_TO_LIVE_SECONDS,
            max_batch_size_bytes: DEFAULT_MAX_BATCH_SIZE_BYTES,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl PipelineConfig {
    /// Defaults plus the two required credentials
    pub fn new(
        broker_connection_string: impl Into<String>,
        storage_connection_string: impl Into<String>,
    ) -> Self {
        Self {
            broker_connection_string: broker_connection_string.into(),
            storage_connection_string: storage_connection_string.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file overlaid with `NOTIFY_*` environment
    /// variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.broker_connection_string.trim().is_empty() {
            return Err(PipelineError::config(
                "Broker connection string not configured (broker_connection_string)",
            ));
        }
        if self.storage_connection_string.trim().is_empty() {
            return Err(PipelineError::config(
                "Storage connection string not configured (storage_connection_string)",
            ));
        }
        if self.queue_name.trim().is_empty() {
            return Err(PipelineError::config("queue_name must not be empty"));
        }
        if self.max_batch_size_bytes == 0 {
            return Err(PipelineError::config("max_batch_size_bytes must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::config("poll_interval_ms must be greater than 0"));
        }
        if self.max_delivery_count == 0 {
            return Err(PipelineError::config("max_delivery_count must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(PipelineError::config("max_connections must be greater than 0"));
        }
        Ok(())
    }

    /// Copy safe to log: credentials are masked
    pub fn sanitized(&self) -> Self {
        let mask = |value: &str| {
            if value.is_empty() {
                String::new()
            } else {
                MASK.to_string()
            }
        };
        Self {
            broker_connection_string: mask(&self.broker_connection_string),
            storage_connection_string: mask(&self.storage_connection_string),
            ..self.clone()
        }
    }

    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live_seconds = ttl.as_secs();
        self
    }

    pub fn with_max_batch_size_bytes(mut self, max_batch_size_bytes: usize) -> Self {
        self.max_batch_size_bytes = max_batch_size_bytes;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout_seconds = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.max_delivery_count = max_delivery_count;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_default_list_limit(mut self, limit: usize) -> Self {
        self.default_list_limit = limit;
        self
    }
}
