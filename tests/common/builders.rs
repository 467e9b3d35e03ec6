//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use notification_pipeline::messaging::ProcessorConfig;
use notification_pipeline::store::Clock;
use notification_pipeline::{
    EntityEvent, EntityOperation, InMemoryTransport, Notification, PipelineConfig,
};

pub const TEST_QUEUE: &str = "notifications";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()
}

/// Clock advancing one second per call
pub fn stepping_clock() -> Clock {
    let tick = Arc::new(AtomicI64::new(0));
    Arc::new(move || base_time() + chrono::Duration::seconds(tick.fetch_add(1, Ordering::SeqCst)))
}

/// Clock that replays the given offsets (in seconds) and then repeats the last one
pub fn scripted_clock(offsets: Vec<i64>) -> Clock {
    let cursor = Arc::new(AtomicI64::new(0));
    Arc::new(move || {
        let index = cursor.fetch_add(1, Ordering::SeqCst) as usize;
        let offset = offsets
            .get(index)
            .or_else(|| offsets.last())
            .copied()
            .unwrap_or(0);
        base_time() + chrono::Duration::seconds(offset)
    })
}

pub fn student_created(id: &str) -> EntityEvent {
    EntityEvent::new("Student", id, EntityOperation::Create)
}

pub fn course_deleted(id: &str, title: &str) -> EntityEvent {
    EntityEvent::new("Course", id, EntityOperation::Delete).with_display_name(title)
}

pub fn notification(entity_id: &str) -> Notification {
    Notification::from_event(student_created(entity_id), base_time()).unwrap()
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig::new("memory://broker", "memory://storage")
        .with_poll_interval(Duration::from_millis(10))
}

pub fn fast_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        queue_name: TEST_QUEUE.to_string(),
        visibility_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
        max_delivery_count: 3,
    }
}

pub fn transport() -> Arc<InMemoryTransport> {
    Arc::new(InMemoryTransport::with_queues(&[TEST_QUEUE]))
}

/// Poll `condition` until it holds, panicking after roughly two seconds
pub async fn wait_until<F: Fn() -> bool>(description: &str, condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {description}");
}
