//! In-process domain event dispatcher (publish/subscribe).
//!
//! The source wires event emission into its collaborators by monkey-patching
//! method pointers at startup and reaching for a module-level singleton
//! dispatcher. Here every collaborator that publishes events takes an
//! explicit `Arc<dyn EventDispatcher>` dependency instead; [`global`] is a
//! lookup of last resort for callers that genuinely have none to inject.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value as EventData;
use thiserror::Error;
use uuid::Uuid;

/// Closed set of domain event kinds (§6). New kinds require a new variant,
/// not a free-form string, so every dispatcher and bridge match is
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEvent {
    TransactionCreated,
    TransactionPosted,
    TransactionFailed,
    TransactionReversed,
    AccountCreated,
    AccountUpdated,
    AccountClosed,
    CustomerCreated,
    CustomerUpdated,
    CustomerKycChanged,
    LoanOriginated,
    LoanDisbursed,
    LoanPayment,
    LoanPaidOff,
    LoanDefaulted,
    CreditStatement,
    CreditPayment,
    CollectionCaseCreated,
    CollectionCaseEscalated,
    CollectionCaseResolved,
    ComplianceAlert,
    ComplianceSuspicious,
    WorkflowStepCompleted,
    WorkflowCompleted,
    WorkflowRejected,
}

impl DomainEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransactionCreated => "TRANSACTION_CREATED",
            Self::TransactionPosted => "TRANSACTION_POSTED",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::TransactionReversed => "TRANSACTION_REVERSED",
            Self::AccountCreated => "ACCOUNT_CREATED",
            Self::AccountUpdated => "ACCOUNT_UPDATED",
            Self::AccountClosed => "ACCOUNT_CLOSED",
            Self::CustomerCreated => "CUSTOMER_CREATED",
            Self::CustomerUpdated => "CUSTOMER_UPDATED",
            Self::CustomerKycChanged => "CUSTOMER_KYC_CHANGED",
            Self::LoanOriginated => "LOAN_ORIGINATED",
            Self::LoanDisbursed => "LOAN_DISBURSED",
            Self::LoanPayment => "LOAN_PAYMENT",
            Self::LoanPaidOff => "LOAN_PAID_OFF",
            Self::LoanDefaulted => "LOAN_DEFAULTED",
            Self::CreditStatement => "CREDIT_STATEMENT",
            Self::CreditPayment => "CREDIT_PAYMENT",
            Self::CollectionCaseCreated => "COLLECTION_CASE_CREATED",
            Self::CollectionCaseEscalated => "COLLECTION_CASE_ESCALATED",
            Self::CollectionCaseResolved => "COLLECTION_CASE_RESOLVED",
            Self::ComplianceAlert => "COMPLIANCE_ALERT",
            Self::ComplianceSuspicious => "COMPLIANCE_SUSPICIOUS",
            Self::WorkflowStepCompleted => "WORKFLOW_STEP_COMPLETED",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
            Self::WorkflowRejected => "WORKFLOW_REJECTED",
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published occurrence, passed to every subscribed handler.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub event_id: Uuid,
    pub event_type: DomainEvent,
    pub entity_type: String,
    pub entity_id: String,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl EventPayload {
    pub fn new(
        event_type: DomainEvent,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: EventData,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[must_use]
pub fn create_transaction_event(
    event_type: DomainEvent,
    transaction_id: impl Into<String>,
    data: EventData,
) -> EventPayload {
    EventPayload::new(event_type, "transaction", transaction_id, data)
}

#[must_use]
pub fn create_account_event(
    event_type: DomainEvent,
    account_id: impl Into<String>,
    data: EventData,
) -> EventPayload {
    EventPayload::new(event_type, "account", account_id, data)
}

#[must_use]
pub fn create_customer_event(
    event_type: DomainEvent,
    customer_id: impl Into<String>,
    data: EventData,
) -> EventPayload {
    EventPayload::new(event_type, "customer", customer_id, data)
}

#[must_use]
pub fn create_loan_event(
    event_type: DomainEvent,
    loan_id: impl Into<String>,
    data: EventData,
) -> EventPayload {
    EventPayload::new(event_type, "loan", loan_id, data)
}

#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct EventHandlerError(pub String);

impl EventHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type EventHandler = Arc<dyn Fn(&EventPayload) -> Result<(), EventHandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Thread-safe publish/subscribe registry keyed by domain event kind, plus a
/// list of catch-all handlers. Handler exceptions are caught, logged with
/// handler identity, and never abort remaining handlers or the publisher.
pub trait EventDispatcher: Send + Sync {
    fn subscribe(&self, event_type: DomainEvent, handler: EventHandler) -> HandlerId;
    fn subscribe_all(&self, handler: EventHandler) -> HandlerId;
    fn unsubscribe(&self, event_type: DomainEvent, handler_id: HandlerId) -> bool;
    fn unsubscribe_all(&self, handler_id: HandlerId) -> bool;
    fn publish(&self, payload: EventPayload);
    fn clear(&self);
    fn handler_count(&self, event_type: Option<DomainEvent>) -> usize;
    fn subscribed_events(&self) -> Vec<DomainEvent>;
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<DomainEvent, Vec<(HandlerId, EventHandler)>>,
    global: Vec<(HandlerId, EventHandler)>,
    next_id: u64,
}

impl Registry {
    fn allocate_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }
}

/// Default in-process dispatcher. Subscription and publication are
/// serialised under a single lock; handlers are invoked only after the lock
/// is released, so a handler may itself subscribe or unsubscribe without
/// deadlocking the registry (it must not call [`EventDispatcher::publish`]
/// on the same dispatcher re-entrantly — see the bus for enqueue-instead).
#[derive(Default)]
pub struct InMemoryEventDispatcher {
    registry: RwLock<Registry>,
}

impl InMemoryEventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventDispatcher for InMemoryEventDispatcher {
    fn subscribe(&self, event_type: DomainEvent, handler: EventHandler) -> HandlerId {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let id = registry.allocate_id();
        registry.by_kind.entry(event_type).or_default().push((id, handler));
        id
    }

    fn subscribe_all(&self, handler: EventHandler) -> HandlerId {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let id = registry.allocate_id();
        registry.global.push((id, handler));
        id
    }

    fn unsubscribe(&self, event_type: DomainEvent, handler_id: HandlerId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match registry.by_kind.get_mut(&event_type) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(id, _)| *id != handler_id);
                handlers.len() != before
            }
            None => false,
        }
    }

    fn unsubscribe_all(&self, handler_id: HandlerId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let before = registry.global.len();
        registry.global.retain(|(id, _)| *id != handler_id);
        registry.global.len() != before
    }

    fn publish(&self, payload: EventPayload) {
        let (kind_handlers, global_handlers) = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            let kind_handlers = registry
                .by_kind
                .get(&payload.event_type)
                .cloned()
                .unwrap_or_default();
            (kind_handlers, registry.global.clone())
        };

        for (id, handler) in kind_handlers.iter().chain(global_handlers.iter()) {
            if let Err(err) = handler(&payload) {
                tracing::error!(
                    handler_id = id.0,
                    event_type = payload.event_type.as_str(),
                    event_id = %payload.event_id,
                    error = %err,
                    "event handler failed"
                );
            }
        }
    }

    fn clear(&self) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.by_kind.clear();
        registry.global.clear();
    }

    fn handler_count(&self, event_type: Option<DomainEvent>) -> usize {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        match event_type {
            Some(kind) => registry.by_kind.get(&kind).map_or(0, Vec::len),
            None => {
                registry.by_kind.values().map(Vec::len).sum::<usize>() + registry.global.len()
            }
        }
    }

    fn subscribed_events(&self) -> Vec<DomainEvent> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry
            .by_kind
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(kind, _)| *kind)
            .collect()
    }
}

static GLOBAL_DISPATCHER: OnceLock<Arc<InMemoryEventDispatcher>> = OnceLock::new();

/// Process-wide default dispatcher, lazily initialised. A lookup of last
/// resort: prefer an injected `Arc<dyn EventDispatcher>` wherever a
/// collaborator is constructed explicitly.
pub fn global() -> Arc<InMemoryEventDispatcher> {
    GLOBAL_DISPATCHER
        .get_or_init(|| Arc::new(InMemoryEventDispatcher::new()))
        .clone()
}

/// A dispatcher that discards every publish. Useful for tests and
/// non-event deployments that still need to satisfy a collaborator's
/// `Arc<dyn EventDispatcher>` dependency.
#[derive(Default)]
pub struct NoopEventDispatcher;

impl EventDispatcher for NoopEventDispatcher {
    fn subscribe(&self, _event_type: DomainEvent, _handler: EventHandler) -> HandlerId {
        HandlerId(0)
    }
    fn subscribe_all(&self, _handler: EventHandler) -> HandlerId {
        HandlerId(0)
    }
    fn unsubscribe(&self, _event_type: DomainEvent, _handler_id: HandlerId) -> bool {
        false
    }
    fn unsubscribe_all(&self, _handler_id: HandlerId) -> bool {
        false
    }
    fn publish(&self, _payload: EventPayload) {}
    fn clear(&self) {}
    fn handler_count(&self, _event_type: Option<DomainEvent>) -> usize {
        0
    }
    fn subscribed_events(&self) -> Vec<DomainEvent> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn dispatches_to_kind_and_global_handlers_in_publish_order() {
        let dispatcher = InMemoryEventDispatcher::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let kind_order = order.clone();
        dispatcher.subscribe(
            DomainEvent::TransactionPosted,
            Arc::new(move |_payload| {
                kind_order.lock().unwrap_or_else(|e| e.into_inner()).push("kind");
                Ok(())
            }),
        );

        let global_order = order.clone();
        dispatcher.subscribe_all(Arc::new(move |_payload| {
            global_order.lock().unwrap_or_else(|e| e.into_inner()).push("global");
            Ok(())
        }));

        dispatcher.publish(create_transaction_event(
            DomainEvent::TransactionPosted,
            "txn-1",
            EventData::Null,
        ));

        assert_eq!(*order.lock().unwrap_or_else(|e| e.into_inner()), vec!["kind", "global"]);
    }

    #[test]
    fn handler_failure_does_not_abort_remaining_handlers() {
        let dispatcher = InMemoryEventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(
            DomainEvent::TransactionFailed,
            Arc::new(|_payload| Err(EventHandlerError::new("boom"))),
        );
        let calls_clone = calls.clone();
        dispatcher.subscribe(
            DomainEvent::TransactionFailed,
            Arc::new(move |_payload| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        dispatcher.publish(create_transaction_event(
            DomainEvent::TransactionFailed,
            "txn-2",
            EventData::Null,
        ));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_the_targeted_handler() {
        let dispatcher = InMemoryEventDispatcher::new();
        let id = dispatcher.subscribe(DomainEvent::AccountCreated, Arc::new(|_| Ok(())));
        dispatcher.subscribe(DomainEvent::AccountCreated, Arc::new(|_| Ok(())));

        assert!(dispatcher.unsubscribe(DomainEvent::AccountCreated, id));
        assert_eq!(dispatcher.handler_count(Some(DomainEvent::AccountCreated)), 1);
    }

    #[test]
    fn subscribed_events_reports_only_kinds_with_handlers() {
        let dispatcher = InMemoryEventDispatcher::new();
        dispatcher.subscribe(DomainEvent::LoanDisbursed, Arc::new(|_| Ok(())));

        assert_eq!(dispatcher.subscribed_events(), vec![DomainEvent::LoanDisbursed]);
    }

    #[test]
    fn noop_dispatcher_accepts_every_call_without_storing_handlers() {
        let dispatcher = NoopEventDispatcher;
        dispatcher.publish(create_account_event(
            DomainEvent::AccountClosed,
            "acc-1",
            EventData::Null,
        ));
        assert_eq!(dispatcher.handler_count(None), 0);
    }
}
