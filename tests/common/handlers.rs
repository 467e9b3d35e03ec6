//! Message handlers that record what the processor hands them

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use notification_pipeline::{DeliveryContext, Notification, NotificationHandler, PipelineError};
use parking_lot::Mutex;

/// Records every invocation; fails the first `failures` of them
#[derive(Debug, Default)]
pub struct RecordingHandler {
    failures: usize,
    delay: Option<Duration>,
    calls: Mutex<Vec<(Notification, DeliveryContext)>>,
    completed: AtomicUsize,
    transport_errors: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Notification, DeliveryContext)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Invocations that ran to completion, successful or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn transport_errors(&self) -> usize {
        self.transport_errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn handle(
        &self,
        notification: &Notification,
        context: &DeliveryContext,
    ) -> anyhow::Result<()> {
        let attempt = {
            let mut calls = self.calls.lock();
            calls.push((notification.clone(), context.clone()));
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if attempt <= self.failures {
            anyhow::bail!("simulated failure on attempt {attempt}");
        }
        Ok(())
    }

    async fn handle_transport_error(&self, _error: &PipelineError) {
        self.transport_errors.fetch_add(1, Ordering::SeqCst);
    }
}
