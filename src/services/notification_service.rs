//! Caller-facing notification operations with dashboard response shapes.
//!
//! Read paths report faults as `success: false` responses instead of
//! returning errors; `send_notification` follows the policy of the sink it
//! wraps.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::constants::DEFAULT_LIST_LIMIT;
use crate::error::Result;
use crate::models::{EntityEvent, Notification};
use crate::sink::{NotificationQuery, NotificationSink};
use crate::store::LocalNotificationStore;

const RETRIEVE_FAILED: &str = "Error retrieving notifications";
const UPDATE_FAILED: &str = "Error updating notification";

/// Response of [`NotificationService::get_notifications`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Vec<Notification>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotificationsResponse {
    pub fn ok(notifications: Vec<Notification>) -> Self {
        Self {
            success: true,
            count: Some(notifications.len()),
            notifications: Some(notifications),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            notifications: None,
            count: None,
            message: Some(message.into()),
        }
    }
}

/// Response of [`NotificationService::mark_as_read`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MarkReadResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub struct NotificationService {
    sink: Arc<dyn NotificationSink>,
    /// Queried instead of the sink when present
    store: Option<Arc<LocalNotificationStore>>,
    default_limit: usize,
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("sink", &self.sink.name())
            .field("has_store", &self.store.is_some())
            .field("default_limit", &self.default_limit)
            .finish()
    }
}

impl NotificationService {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            store: None,
            default_limit: DEFAULT_LIST_LIMIT,
        }
    }

    /// Answer queries from `store` rather than from the sink
    pub fn with_store(mut self, store: Arc<LocalNotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    fn query(&self) -> Option<&dyn NotificationQuery> {
        match &self.store {
            Some(store) => Some(&**store),
            None => self.sink.query(),
        }
    }

    /// Hand an entity event to the configured sink
    #[instrument(skip(self, event), fields(sink = self.sink.name(), entity_type = %event.entity_type, operation = %event.operation))]
    pub async fn send_notification(&self, event: EntityEvent) -> Result<Option<Notification>> {
        self.sink.submit(event).await
    }

    /// Most recent notifications, newest first; `limit` defaults to the
    /// configured page size
    pub fn get_notifications(&self, limit: Option<usize>) -> NotificationsResponse {
        let Some(query) = self.query() else {
            error!(sink = self.sink.name(), "No queryable notification store configured");
            return NotificationsResponse::failure(RETRIEVE_FAILED);
        };

        let limit = limit.unwrap_or(self.default_limit);
        match panic::catch_unwind(AssertUnwindSafe(|| query.list(Some(limit)))) {
            Ok(notifications) => NotificationsResponse::ok(notifications),
            Err(_) => {
                error!("Error retrieving notifications");
                NotificationsResponse::failure(RETRIEVE_FAILED)
            }
        }
    }

    /// Mark one notification as read; unknown ids still succeed
    pub fn mark_as_read(&self, id: i64) -> MarkReadResponse {
        let Some(query) = self.query() else {
            error!(
                notification_id = id,
                sink = self.sink.name(),
                "No queryable notification store configured"
            );
            return MarkReadResponse::failure(UPDATE_FAILED);
        };

        match panic::catch_unwind(AssertUnwindSafe(|| query.mark_read(id))) {
            Ok(_) => MarkReadResponse::ok(),
            Err(_) => {
                error!(notification_id = id, "Error updating notification");
                MarkReadResponse::failure(UPDATE_FAILED)
            }
        }
    }

    /// Oldest unread notification, if any
    pub fn receive_notification(&self) -> Option<Notification> {
        self.query().and_then(|query| query.first_unread())
    }
}
