//! # Local Notification Store
//!
//! Synchronous, process-local record of notifications used when no durable
//! broker is configured and as the always-available tier behind the dashboard.
//!
//! ## Failure policy
//!
//! Recording never fails the caller. Validation errors, audit-hook errors and
//! panics raised while recording are caught and logged, and the notification is
//! simply not stored. Business operations must not abort because a
//! notification could not be recorded.
//!
//! ## Locking
//!
//! One `parking_lot::Mutex` guards the backing sequence and the id counter.
//! Id assignment, the audit hook and the append all happen under that lock and
//! none of them await, so `list` never observes a half-built record and
//! `mark_read` never races an id assignment.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::logging::{log_error, log_notification_operation};
use crate::models::{EntityEvent, Notification};

/// Source of `createdAt` timestamps
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Hook invoked for every notification about to be stored.
///
/// An error aborts that one record without surfacing to the caller.
pub trait NotificationAudit: Send + Sync + 'static {
    fn on_recorded(&self, notification: &Notification) -> Result<()>;
}

/// Default audit hook: one structured log line per stored notification
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl NotificationAudit for TracingAudit {
    fn on_recorded(&self, notification: &Notification) -> Result<()> {
        log_notification_operation(
            "record",
            notification.id(),
            notification.entity_type(),
            notification.entity_id(),
            "success",
            Some(notification.message()),
        );
        Ok(())
    }
}

#[derive(Debug)]
struct StoreInner {
    notifications: Vec<Notification>,
    next_id: i64,
}

pub struct LocalNotificationStore {
    inner: Mutex<StoreInner>,
    clock: Clock,
    audit: Arc<dyn NotificationAudit>,
}

impl fmt::Debug for LocalNotificationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LocalNotificationStore")
            .field("len", &inner.notifications.len())
            .field("next_id", &inner.next_id)
            .finish()
    }
}

impl Default for LocalNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalNotificationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                notifications: Vec::new(),
                next_id: 1,
            }),
            clock: Arc::new(Utc::now),
            audit: Arc::new(TracingAudit),
        }
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the audit hook
    pub fn with_audit(mut self, audit: Arc<dyn NotificationAudit>) -> Self {
        self.audit = audit;
        self
    }

    /// Build a notification from `event` and append it with the next id.
    ///
    /// Returns `None` if anything went wrong; the fault is logged, never raised.
    pub fn record(&self, event: EntityEvent) -> Option<Notification> {
        let entity_type = event.entity_type.clone();
        let entity_id = event.entity_id.clone();

        self.guarded("record", &entity_type, &entity_id, || {
            let notification = Notification::from_event(event, (self.clock)())?;
            self.insert(notification)
        })
    }

    /// Store an already-built notification under a fresh local id.
    ///
    /// Message text and `createdAt` are kept as received; any id the
    /// notification carried is replaced. Same failure policy as [`record`].
    ///
    /// [`record`]: Self::record
    pub fn append(&self, notification: Notification) -> Option<Notification> {
        let entity_type = notification.entity_type().to_string();
        let entity_id = notification.entity_id().to_string();

        self.guarded("append", &entity_type, &entity_id, || self.insert(notification))
    }

    fn insert(&self, notification: Notification) -> Result<Notification> {
        let mut inner = self.inner.lock();
        let notification = notification.with_id(inner.next_id);

        self.audit.on_recorded(&notification)?;

        inner.notifications.push(notification.clone());
        inner.next_id += 1;
        Ok(notification)
    }

    fn guarded<F>(
        &self,
        operation: &str,
        entity_type: &str,
        entity_id: &str,
        f: F,
    ) -> Option<Notification>
    where
        F: FnOnce() -> Result<Notification>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
            Err(PipelineError::handler_fault(panic_message(payload.as_ref())))
        });

        match outcome {
            Ok(notification) => {
                debug!(
                    notification_id = notification.id(),
                    entity_type = %entity_type,
                    "Notification stored locally"
                );
                Some(notification)
            }
            Err(e) => {
                warn!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    error = %e,
                    "Error recording notification"
                );
                log_error(
                    "local_store",
                    operation,
                    &e.to_string(),
                    Some(&format!("{entity_type}/{entity_id}")),
                );
                None
            }
        }
    }

    /// Notifications newest first by `createdAt`, ties in insertion order,
    /// truncated to `limit` when given.
    pub fn list(&self, limit: Option<usize>) -> Vec<Notification> {
        let mut notifications = self.inner.lock().notifications.clone();

        // Stable sort keeps insertion order among equal timestamps
        notifications.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        if let Some(limit) = limit {
            notifications.truncate(limit);
        }
        notifications
    }

    /// Mark a notification as read.
    ///
    /// Returns whether the id is known; unknown ids and repeat calls are no-ops.
    pub fn mark_read(&self, id: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.notifications.iter_mut().find(|n| n.id() == Some(id)) {
            Some(notification) => {
                if notification.mark_read() {
                    debug!(notification_id = id, "Notification marked as read");
                }
                true
            }
            None => false,
        }
    }

    /// Earliest-inserted notification that has not been read
    pub fn first_unread(&self) -> Option<Notification> {
        self.inner
            .lock()
            .notifications
            .iter()
            .find(|n| !n.is_read())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
