//! # Notification Codec
//!
//! Lossless UTF-8 JSON serialization of a [`Notification`] into a transport
//! payload and back. Malformed or truncated input yields
//! [`PipelineError::Decode`].

use crate::error::Result;
use crate::models::Notification;

/// Serialize a notification to its transport payload
pub fn encode(notification: &Notification) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(notification)?)
}

/// Deserialize a transport payload into a notification
pub fn decode(bytes: &[u8]) -> Result<Notification> {
    Ok(serde_json::from_slice(bytes)?)
}
