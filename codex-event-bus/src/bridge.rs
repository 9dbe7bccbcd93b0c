//! Bridges the in-process dispatcher (`codex_events`) to the external bus
//! (§4.10): internal domain events are mirrored onto named topics, and
//! inbound fraud decisions/alerts from the scoring producer are translated
//! into transaction-metadata updates and compliance alerts.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use codex_compliance::AlertSink;
use codex_compliance::CreateAlertRequest;
use codex_events::DomainEvent;
use codex_events::EventDispatcher;
use codex_events::EventHandlerError;
use codex_events::EventPayload;
use codex_events::HandlerId;
use serde_json::Value;
use thiserror::Error;

use crate::EventBus;
use crate::EventBusError;
use crate::EventEnvelope;
use crate::topics;

#[derive(Debug, Error)]
pub enum TransactionMetadataSinkError {
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FraudDecisionUpdate {
    pub score: f64,
    pub decision: String,
    pub risk_level: String,
    pub reasons: Vec<String>,
}

/// Narrow collaborator the bridge uses to record an inbound fraud decision
/// against the originating transaction. The transaction processor's storage
/// implements this; the bridge never depends on the processor directly.
#[async_trait]
pub trait TransactionMetadataSink: Send + Sync {
    async fn record_fraud_decision(
        &self,
        transaction_id: &str,
        update: FraudDecisionUpdate,
    ) -> Result<(), TransactionMetadataSinkError>;
}

/// Which domain events this bridge mirrors to the external bus. Defaults to
/// the minimum set named in §4.10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedEvents(pub Vec<DomainEvent>);

impl Default for BridgedEvents {
    fn default() -> Self {
        Self(vec![
            DomainEvent::TransactionPosted,
            DomainEvent::CustomerCreated,
            DomainEvent::CustomerUpdated,
        ])
    }
}

fn extract_customer_id(data: &Value) -> Option<String> {
    data.get("customer_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn outbound_envelope(event: &EventPayload) -> EventEnvelope {
    let mut data = event.data.clone();
    if let Value::Object(ref mut map) = data {
        if !map.contains_key("customer_id") {
            if let Some(customer_id) = extract_customer_id(&event.data) {
                map.insert("customer_id".to_string(), Value::String(customer_id));
            }
        }
    }

    EventEnvelope::new(event.event_type.as_str().to_lowercase().replace('_', "."), data)
        .with_entity(event.entity_type.clone(), event.entity_id.clone())
}

/// Connects a `codex_events::EventDispatcher` to a `codex_event_bus::EventBus`.
pub struct FraudEventBridge {
    dispatcher: Arc<dyn EventDispatcher>,
    bus: Arc<dyn EventBus>,
    metadata_sink: Option<Arc<dyn TransactionMetadataSink>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    bridged_events: BridgedEvents,
    subscriptions: Mutex<Vec<(DomainEvent, HandlerId)>>,
}

impl FraudEventBridge {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn EventDispatcher>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            dispatcher,
            bus,
            metadata_sink: None,
            alert_sink: None,
            bridged_events: BridgedEvents::default(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_collaborators(
        dispatcher: Arc<dyn EventDispatcher>,
        bus: Arc<dyn EventBus>,
        metadata_sink: Arc<dyn TransactionMetadataSink>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            dispatcher,
            bus,
            metadata_sink: Some(metadata_sink),
            alert_sink: Some(alert_sink),
            bridged_events: BridgedEvents::default(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_bridged_events(mut self, events: BridgedEvents) -> Self {
        self.bridged_events = events;
        self
    }

    /// Subscribes to the configured internal events and to the inbound
    /// fraud topics, starting the bus if it isn't already running.
    pub async fn start(&self) {
        for &event in &self.bridged_events.0 {
            let bus = self.bus.clone();
            let handler = Arc::new(move |payload: &EventPayload| -> Result<(), EventHandlerError> {
                let envelope = outbound_envelope(payload);
                let topic = topics::topic_for_domain_event(payload.event_type);
                let key = payload.entity_id.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    bus.publish(topic, envelope, Some(key)).await;
                });
                Ok(())
            });
            let handler_id = self.dispatcher.subscribe(event, handler);
            self.subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((event, handler_id));
        }

        if let Some(metadata_sink) = self.metadata_sink.clone() {
            let alert_sink = self.alert_sink.clone();
            self.bus
                .subscribe(
                    topics::BASTION_DECISIONS_TOPIC,
                    Arc::new(move |envelope: &EventEnvelope| {
                        handle_fraud_decision(envelope, metadata_sink.clone(), alert_sink.clone())
                    }),
                )
                .await;
        }

        if let Some(alert_sink) = self.alert_sink.clone() {
            self.bus
                .subscribe(
                    topics::BASTION_ALERTS_TOPIC,
                    Arc::new(move |envelope: &EventEnvelope| {
                        handle_fraud_alert(envelope, alert_sink.clone())
                    }),
                )
                .await;
        }

        if !self.bus.is_running() {
            self.bus.start().await;
        }
    }

    pub async fn stop(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()));
        for (event, handler_id) in subscriptions {
            self.dispatcher.unsubscribe(event, handler_id);
        }
    }
}

fn handle_fraud_decision(
    envelope: &EventEnvelope,
    metadata_sink: Arc<dyn TransactionMetadataSink>,
    alert_sink: Option<Arc<dyn AlertSink>>,
) -> Result<(), EventBusError> {
    let transaction_id = envelope
        .data
        .get("transaction_id")
        .and_then(Value::as_str)
        .ok_or_else(|| EventBusError::Handler("fraud decision missing transaction_id".to_string()))?
        .to_string();

    let score = envelope.data.get("score").and_then(Value::as_f64).unwrap_or(0.0);
    let decision = envelope
        .data
        .get("decision")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let risk_level = envelope
        .data
        .get("risk_level")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let reasons: Vec<String> = envelope
        .data
        .get("reasons")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let update = FraudDecisionUpdate {
        score,
        decision: decision.clone(),
        risk_level: risk_level.clone(),
        reasons: reasons.clone(),
    };

    tokio::spawn(async move {
        if let Err(err) = metadata_sink.record_fraud_decision(&transaction_id, update).await {
            tracing::error!(transaction_id, error = %err, "failed to record fraud decision");
        }

        if decision == "REVIEW" || decision == "BLOCK" {
            if let Some(alert_sink) = alert_sink {
                let severity = if decision == "BLOCK" { "HIGH" } else { "MEDIUM" };
                let request = CreateAlertRequest {
                    alert_type: "FRAUD_DETECTION".to_string(),
                    severity: severity.to_string(),
                    customer_id: None,
                    transaction_id: Some(transaction_id.clone()),
                    description: format!("Fraud detection: {decision} (score={score})"),
                    metadata: Default::default(),
                };
                if let Err(err) = alert_sink.create_alert(request).await {
                    tracing::error!(transaction_id, error = ?err, "failed to create compliance alert");
                }
            }
        }
    });

    Ok(())
}

fn handle_fraud_alert(
    envelope: &EventEnvelope,
    alert_sink: Arc<dyn AlertSink>,
) -> Result<(), EventBusError> {
    let customer_id = envelope
        .data
        .get("customer_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let alert_type = envelope
        .data
        .get("alert_type")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();
    let severity = envelope
        .data
        .get("severity")
        .and_then(Value::as_str)
        .unwrap_or("MEDIUM")
        .to_string();
    let description = envelope
        .data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    tokio::spawn(async move {
        let request = CreateAlertRequest {
            alert_type: "FRAUD_PATTERN".to_string(),
            severity,
            customer_id,
            transaction_id: None,
            description: format!("Fraud pattern detected: {alert_type} - {description}"),
            metadata: Default::default(),
        };
        if let Err(err) = alert_sink.create_alert(request).await {
            tracing::error!(alert_type, error = ?err, "failed to create compliance alert from fraud alert");
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryEventBus;
    use codex_compliance::InMemoryAlertSink;
    use codex_events::InMemoryEventDispatcher;
    use codex_events::create_transaction_event;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn bridges_transaction_posted_to_external_topic() {
        let dispatcher: Arc<dyn EventDispatcher> = Arc::new(InMemoryEventDispatcher::new());
        let concrete_bus = Arc::new(InMemoryEventBus::new());
        let bus: Arc<dyn EventBus> = concrete_bus.clone();
        let bridge = FraudEventBridge::new(dispatcher.clone(), bus);
        bridge.start().await;

        dispatcher.publish(create_transaction_event(
            DomainEvent::TransactionPosted,
            "txn-1",
            json!({"amount": "100.00", "currency": "USD"}),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = concrete_bus.events(Some(topics::TRANSACTIONS_POSTED)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].2, Some("txn-1".to_string()));
    }

    #[tokio::test]
    async fn fraud_decision_creates_block_alert() {
        let dispatcher: Arc<dyn EventDispatcher> = Arc::new(InMemoryEventDispatcher::new());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let alert_sink = Arc::new(InMemoryAlertSink::new());
        let metadata_sink: Arc<dyn TransactionMetadataSink> = Arc::new(NoopMetadataSink);
        let bridge = FraudEventBridge::with_collaborators(
            dispatcher,
            bus.clone(),
            metadata_sink,
            alert_sink.clone(),
        );
        bridge.start().await;

        bus.publish(
            topics::BASTION_DECISIONS_TOPIC,
            EventEnvelope::new(
                "fraud.decision",
                json!({
                    "transaction_id": "txn-9",
                    "score": 0.92,
                    "decision": "BLOCK",
                    "risk_level": "CRITICAL",
                    "reasons": ["high_amount"],
                }),
            ),
            None,
        )
        .await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let alerts = alert_sink.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, "HIGH");
    }

    struct NoopMetadataSink;

    #[async_trait]
    impl TransactionMetadataSink for NoopMetadataSink {
        async fn record_fraud_decision(
            &self,
            _transaction_id: &str,
            _update: FraudDecisionUpdate,
        ) -> Result<(), TransactionMetadataSinkError> {
            Ok(())
        }
    }
}
