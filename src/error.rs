//! Error types for the notification pipeline

use thiserror::Error;

/// Result type for notification pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur anywhere in the notification pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid configuration; fatal at construction
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed or truncated transport payload
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Network or broker fault during send, receive, or settlement
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A notification did not fit into the current transport batch
    #[error("Message batch is too large: notification at index {index} exceeds the {max_size_bytes} byte batch limit")]
    BatchTooLarge { index: usize, max_size_bytes: usize },

    /// A message handler failed or panicked while processing a notification
    #[error("Handler fault: {message}")]
    HandlerFault { message: String },

    /// Required notification fields were missing
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Operation not permitted in the current processor state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl PipelineError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a handler fault
    pub fn handler_fault<S: Into<String>>(message: S) -> Self {
        Self::HandlerFault {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether the same operation may succeed if retried unchanged.
    ///
    /// Only transport faults qualify; an oversized batch must be split first and
    /// configuration or decode failures will fail identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Decode(_) => "decode",
            Self::Transport { .. } => "transport",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::HandlerFault { .. } => "handler_fault",
            Self::Validation { .. } => "validation",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::transport(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<pgmq::errors::PgmqError> for PipelineError {
    fn from(err: pgmq::errors::PgmqError) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
