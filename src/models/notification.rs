//! # Notification Record
//!
//! The immutable-after-creation unit of work flowing through the pipeline.
//! Everything except `is_read` is fixed when the record is built; the message
//! text is derived once from the entity event and never recomputed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CREATED_BY;
use crate::error::{PipelineError, Result};

/// Operation performed on a domain entity.
///
/// The three well-known operations get their own variants; anything else is
/// carried literally so newer producers can introduce operations without
/// breaking older consumers. Values are only built by parsing, so a
/// well-known name never ends up in [`EntityOperation::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityOperation {
    Create,
    Update,
    Delete,
    Other(UnknownOperation),
}

/// Operation name outside the well-known set, kept exactly as received
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownOperation(String);

impl UnknownOperation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EntityOperation {
    /// Wire representation (`"CREATE"`, `"UPDATE"`, `"DELETE"` or the literal value)
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// Past-tense verb used in generated messages, if the operation is well-known
    pub fn verb(&self) -> Option<&'static str> {
        match self {
            Self::Create => Some("created"),
            Self::Update => Some("updated"),
            Self::Delete => Some("deleted"),
            Self::Other(_) => None,
        }
    }
}

impl From<&str> for EntityOperation {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Self::Create,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Other(UnknownOperation(raw.to_string())),
        }
    }
}

impl From<String> for EntityOperation {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<EntityOperation> for String {
    fn from(operation: EntityOperation) -> Self {
        match operation {
            EntityOperation::Other(raw) => raw.0,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An "entity X was created/updated/deleted" event raised by a caller.
///
/// This is the input side of the pipeline; a [`Notification`] is built from it
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub entity_display_name: Option<String>,
    pub operation: EntityOperation,
    pub created_by: Option<String>,
}

impl EntityEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: EntityOperation,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_display_name: None,
            operation,
            created_by: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.entity_display_name = Some(display_name.into());
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Check that the mandatory identifying fields are present
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(PipelineError::validation("entity_type is required"));
        }
        if self.entity_id.trim().is_empty() {
            return Err(PipelineError::validation("entity_id is required"));
        }
        Ok(())
    }
}

/// Render the human-readable message for an entity event.
///
/// Blank display names fall back to `"{type} (ID: {id})"`.
pub fn generate_message(
    entity_type: &str,
    entity_id: &str,
    entity_display_name: Option<&str>,
    operation: &EntityOperation,
) -> String {
    let display_text = match entity_display_name {
        Some(name) if !name.trim().is_empty() => format!("{entity_type} '{name}'"),
        _ => format!("{entity_type} (ID: {entity_id})"),
    };

    match operation {
        EntityOperation::Create => format!("New {display_text} has been created"),
        EntityOperation::Update => format!("{display_text} has been updated"),
        EntityOperation::Delete => format!("{display_text} has been deleted"),
        EntityOperation::Other(raw) => format!("{display_text} operation: {raw}"),
    }
}

/// A recorded entity-operation notification.
///
/// Wire form is a camelCase JSON object; `id` and `entityDisplayName` are
/// omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    entity_type: String,
    entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_display_name: Option<String>,
    operation: EntityOperation,
    message: String,
    created_at: DateTime<Utc>,
    created_by: String,
    is_read: bool,
}

impl Notification {
    /// Build a notification from an event, computing its message once.
    ///
    /// The id is left unassigned; whichever store persists the record assigns it.
    pub fn from_event(event: EntityEvent, created_at: DateTime<Utc>) -> Result<Self> {
        event.validate()?;

        let message = generate_message(
            &event.entity_type,
            &event.entity_id,
            event.entity_display_name.as_deref(),
            &event.operation,
        );

        let created_by = event
            .created_by
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CREATED_BY.to_string());

        Ok(Self {
            id: None,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            entity_display_name: event.entity_display_name,
            operation: event.operation,
            message,
            created_at,
            created_by,
            is_read: false,
        })
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity_display_name(&self) -> Option<&str> {
        self.entity_display_name.as_deref()
    }

    pub fn operation(&self) -> &EntityOperation {
        &self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn is_read(&self) -> bool {
        self.is_read
    }

    /// Attach the id chosen by the persisting store
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Flip `is_read` to true. Returns whether the flag actually changed.
    pub(crate) fn mark_read(&mut self) -> bool {
        let changed = !self.is_read;
        self.is_read = true;
        changed
    }
}
