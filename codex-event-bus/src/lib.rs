//! External event bus abstraction (§4.6) and the bridge (§4.10) from the
//! in-process dispatcher to named external topics.
//!
//! The concrete broker driver is out of scope: no network client is pulled
//! in. [`broker::BrokerBackedEventBus`] preserves the start/stop/poll-loop
//! contract a Kafka-backed implementation would have, using an in-process
//! bounded channel per topic instead of a wire protocol.

mod broker;
mod bridge;
pub mod topics;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value as EnvelopeData;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use broker::BrokerBackedEventBus;
pub use bridge::BridgedEvents;
pub use bridge::FraudDecisionUpdate;
pub use bridge::FraudEventBridge;
pub use bridge::TransactionMetadataSink;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event bus handler failed: {0}")]
    Handler(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// CloudEvents-style envelope (§3, §6). Decimals are carried as strings
/// inside `data`/`metadata` to preserve precision across the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub version: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub data: EnvelopeData,
    pub metadata: EnvelopeData,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, data: EnvelopeData) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: "nexum".to_string(),
            version: "1.0".to_string(),
            entity_type: None,
            entity_id: None,
            data,
            metadata: EnvelopeData::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }
}

pub type TopicHandler =
    Arc<dyn Fn(&EventEnvelope) -> Result<(), EventBusError> + Send + Sync>;

fn invoke_handlers(topic: &str, envelope: &EventEnvelope, handlers: &[TopicHandler]) {
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(topic, error = %err, "event bus handler failed");
            }
            Err(_) => {
                tracing::error!(topic, "event bus handler panicked");
            }
        }
    }
}

/// Abstract bus interface (§4.6): publish/publish-batch/subscribe/start/
/// stop/is-running. Publish failures are logged and never raised to the
/// caller — event delivery must not block a successful business operation.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: EventEnvelope, key: Option<String>);
    async fn publish_batch(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
        keys: Option<Vec<Option<String>>>,
    );
    async fn subscribe(&self, topic: &str, handler: TopicHandler);
    async fn start(&self);
    async fn stop(&self);
    fn is_running(&self) -> bool;
}

#[derive(Default)]
struct BusState {
    events: Vec<(String, EventEnvelope, Option<String>)>,
    handlers: HashMap<String, Vec<TopicHandler>>,
}

/// Retains every published event for test inspection; handlers run
/// synchronously on publish.
#[derive(Default)]
pub struct InMemoryEventBus {
    state: RwLock<BusState>,
    running: AtomicBool,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self, topic: Option<&str>) -> Vec<(String, EventEnvelope, Option<String>)> {
        let state = self.state.read().await;
        match topic {
            Some(topic) => state
                .events
                .iter()
                .filter(|(t, _, _)| t == topic)
                .cloned()
                .collect(),
            None => state.events.clone(),
        }
    }

    pub async fn clear_events(&self) {
        self.state.write().await.events.clear();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope, key: Option<String>) {
        let mut state = self.state.write().await;
        state.events.push((topic.to_string(), envelope.clone(), key));
        let handlers = state.handlers.get(topic).cloned().unwrap_or_default();
        invoke_handlers(topic, &envelope, &handlers);
    }

    async fn publish_batch(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
        keys: Option<Vec<Option<String>>>,
    ) {
        let mut keys = keys.unwrap_or_default();
        keys.resize(envelopes.len(), None);
        for (envelope, key) in envelopes.into_iter().zip(keys) {
            self.publish(topic, envelope, key).await;
        }
    }

    async fn subscribe(&self, topic: &str, handler: TopicHandler) {
        self.state
            .write()
            .await
            .handlers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Logs a human-readable line per publish via `tracing::info!`, then still
/// notifies registered handlers so hooks work in development.
#[derive(Default)]
pub struct LogEventBus {
    handlers: RwLock<HashMap<String, Vec<TopicHandler>>>,
    running: AtomicBool,
}

impl LogEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for LogEventBus {
    async fn publish(&self, topic: &str, envelope: EventEnvelope, _key: Option<String>) {
        tracing::info!(
            topic,
            event_type = %envelope.event_type,
            entity_type = envelope.entity_type.as_deref().unwrap_or(""),
            entity_id = envelope.entity_id.as_deref().unwrap_or(""),
            "EVENT"
        );
        let handlers = self.handlers.read().await.get(topic).cloned().unwrap_or_default();
        invoke_handlers(topic, &envelope, &handlers);
    }

    async fn publish_batch(
        &self,
        topic: &str,
        envelopes: Vec<EventEnvelope>,
        keys: Option<Vec<Option<String>>>,
    ) {
        let mut keys = keys.unwrap_or_default();
        keys.resize(envelopes.len(), None);
        for (envelope, key) in envelopes.into_iter().zip(keys) {
            self.publish(topic, envelope, key).await;
        }
    }

    async fn subscribe(&self, topic: &str, handler: TopicHandler) {
        self.handlers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("LogEventBus started");
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("LogEventBus stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn envelope(event_type: &str) -> EventEnvelope {
        EventEnvelope::new(event_type, EnvelopeData::Null).with_entity("transaction", "txn-1")
    }

    #[tokio::test]
    async fn in_memory_bus_retains_events_and_notifies_handlers() {
        let bus = InMemoryEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bus.subscribe(
            topics::TRANSACTIONS_POSTED,
            Arc::new(move |_envelope| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;

        bus.publish(
            topics::TRANSACTIONS_POSTED,
            envelope("transaction.processed"),
            Some("txn-1".to_string()),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let events = bus.events(Some(topics::TRANSACTIONS_POSTED)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].2, Some("txn-1".to_string()));
    }

    #[tokio::test]
    async fn in_memory_bus_handler_failure_does_not_stop_other_handlers() {
        let bus = InMemoryEventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "topic-a",
            Arc::new(|_envelope| Err(EventBusError::Handler("boom".to_string()))),
        )
        .await;
        let calls_clone = calls.clone();
        bus.subscribe(
            "topic-a",
            Arc::new(move |_envelope| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;

        bus.publish("topic-a", envelope("test"), None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn log_bus_reports_running_state() {
        let bus = LogEventBus::new();
        assert!(!bus.is_running());
        bus.start().await;
        assert!(bus.is_running());
        bus.stop().await;
        assert!(!bus.is_running());
    }
}
