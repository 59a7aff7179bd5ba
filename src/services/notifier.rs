//! Delivery of order events to downstream consumers (confirmation mail,
//! fulfilment). Delivery is best effort: the state change is already
//! committed when a notifier runs, so failures are logged, not returned.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::events::OrderEvent;

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, event: &OrderEvent);
}

/// Logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl OrderNotifier for TracingNotifier {
    async fn notify(&self, event: &OrderEvent) {
        info!(order_id = %event.order_id(), kind = event.kind(), "order event");
    }
}

/// Publishes each event as JSON on `<prefix>.<kind>`.
pub struct NatsNotifier {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client, subject_prefix: impl Into<String>) -> Self {
        Self { client, subject_prefix: subject_prefix.into() }
    }
}

#[async_trait]
impl OrderNotifier for NatsNotifier {
    async fn notify(&self, event: &OrderEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => { warn!(error = %e, "failed to encode order event"); return; }
        };
        let subject = format!("{}.{}", self.subject_prefix, event.kind());
        if let Err(e) = self.client.publish(subject, payload.into()).await {
            warn!(order_id = %event.order_id(), error = %e, "failed to publish order event");
        }
    }
}

/// Keeps events in memory, for tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self { Self::default() }
    pub async fn events(&self) -> Vec<OrderEvent> { self.events.lock().await.clone() }
    pub async fn count(&self, kind: &str) -> usize { self.events.lock().await.iter().filter(|e| e.kind() == kind).count() }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn notify(&self, event: &OrderEvent) {
        self.events.lock().await.push(event.clone());
    }
}
