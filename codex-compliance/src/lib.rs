#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type CustomerId = String;
pub type AccountId = String;
pub type TransactionId = String;

pub type ComplianceResult<T> = Result<T, ComplianceError>;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// The gate's verdict on a screened transaction or customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceAction {
    Allow,
    Flag,
    Block,
}

/// The request handed to the gate by the transaction processor. Deliberately
/// narrow — the gate is a black box to the core, so this carries only what a
/// screening decision needs, not the full `Transaction` record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionComplianceRequest {
    pub customer_id: CustomerId,
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub transaction_type: String,
    pub transaction_id: TransactionId,
}

/// Generalised from the teacher's posting-approval rule set: auto-post limit
/// becomes an auto-allow limit, vendor/account approval-required and blocked
/// lists become customer/account flagged and blocked sets.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceRuleSet {
    pub blocked_customers: HashSet<CustomerId>,
    pub blocked_accounts: HashSet<AccountId>,
    pub flagged_customers: HashSet<CustomerId>,
    pub flagged_accounts: HashSet<AccountId>,
    pub blocked_transaction_types: HashSet<String>,
    /// Amounts at or above this limit are blocked outright.
    pub auto_allow_limit_minor: i64,
    /// Reserved for a future velocity/confidence signal; unused today but
    /// kept on the rule set so a later scorer integration doesn't need a
    /// schema change.
    pub confidence_floor: Option<f64>,
}

impl Default for ComplianceRuleSet {
    fn default() -> Self {
        Self {
            blocked_customers: HashSet::new(),
            blocked_accounts: HashSet::new(),
            flagged_customers: HashSet::new(),
            flagged_accounts: HashSet::new(),
            blocked_transaction_types: HashSet::new(),
            auto_allow_limit_minor: 1_000_000_00,
            confidence_floor: None,
        }
    }
}

impl ComplianceRuleSet {
    pub fn evaluate(&self, request: &TransactionComplianceRequest) -> EvaluationOutcome {
        let mut violations = Vec::new();

        if self.blocked_customers.contains(&request.customer_id) {
            violations.push(format!("customer {} is blocked", request.customer_id));
        }
        if self.blocked_accounts.contains(&request.account_id) {
            violations.push(format!("account {} is blocked", request.account_id));
        }
        if self
            .blocked_transaction_types
            .contains(&request.transaction_type)
        {
            violations.push(format!(
                "transaction type {} is blocked",
                request.transaction_type
            ));
        }

        if !violations.is_empty() {
            return EvaluationOutcome {
                action: ComplianceAction::Block,
                violations,
            };
        }

        let mut flags = Vec::new();
        if self.flagged_customers.contains(&request.customer_id) {
            flags.push(format!("customer {} is under review", request.customer_id));
        }
        if self.flagged_accounts.contains(&request.account_id) {
            flags.push(format!("account {} is under review", request.account_id));
        }
        if request.amount_minor >= self.auto_allow_limit_minor {
            flags.push(format!(
                "amount {} exceeds the auto-allow limit of {}",
                request.amount_minor, self.auto_allow_limit_minor
            ));
        }

        if !flags.is_empty() {
            return EvaluationOutcome {
                action: ComplianceAction::Flag,
                violations: flags,
            };
        }

        EvaluationOutcome {
            action: ComplianceAction::Allow,
            violations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub action: ComplianceAction,
    pub violations: Vec<String>,
}

#[async_trait]
pub trait ComplianceRuleStore: Send + Sync {
    async fn get_rules(&self) -> ComplianceResult<ComplianceRuleSet>;
    async fn put_rules(&self, rules: ComplianceRuleSet) -> ComplianceResult<()>;
}

#[derive(Default)]
pub struct InMemoryComplianceRuleStore {
    rules: RwLock<Option<ComplianceRuleSet>>,
}

impl InMemoryComplianceRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rules(rules: ComplianceRuleSet) -> Self {
        Self {
            rules: RwLock::new(Some(rules)),
        }
    }
}

#[async_trait]
impl ComplianceRuleStore for InMemoryComplianceRuleStore {
    async fn get_rules(&self) -> ComplianceResult<ComplianceRuleSet> {
        let guard = self.rules.read().await;
        Ok(guard.clone().unwrap_or_default())
    }

    async fn put_rules(&self, rules: ComplianceRuleSet) -> ComplianceResult<()> {
        let mut guard = self.rules.write().await;
        *guard = Some(rules);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceCheckEvent {
    pub transaction_id: TransactionId,
    pub customer_id: CustomerId,
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub action: ComplianceAction,
    pub violations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait ComplianceEventSink: Send + Sync {
    async fn record(&self, event: ComplianceCheckEvent);
}

#[derive(Clone, Default)]
pub struct NoopComplianceEventSink;

#[async_trait]
impl ComplianceEventSink for NoopComplianceEventSink {
    async fn record(&self, _event: ComplianceCheckEvent) {}
}

#[derive(Default)]
pub struct InMemoryComplianceEventSink {
    events: RwLock<Vec<ComplianceCheckEvent>>,
}

impl InMemoryComplianceEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ComplianceCheckEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl ComplianceEventSink for InMemoryComplianceEventSink {
    async fn record(&self, event: ComplianceCheckEvent) {
        self.events.write().await.push(event);
    }
}

/// A compliance alert raised out-of-band — from a manual review queue, or
/// from the event bridge translating a fraud-producer alert (§4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceAlert {
    pub id: String,
    pub alert_type: String,
    pub severity: String,
    pub customer_id: Option<CustomerId>,
    pub transaction_id: Option<TransactionId>,
    pub description: String,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateAlertRequest {
    pub alert_type: String,
    pub severity: String,
    pub customer_id: Option<CustomerId>,
    pub transaction_id: Option<TransactionId>,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn create_alert(&self, request: CreateAlertRequest) -> ComplianceResult<ComplianceAlert>;
}

#[derive(Default)]
pub struct InMemoryAlertSink {
    alerts: RwLock<Vec<ComplianceAlert>>,
}

impl InMemoryAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<ComplianceAlert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn create_alert(&self, request: CreateAlertRequest) -> ComplianceResult<ComplianceAlert> {
        let alert = ComplianceAlert {
            id: Uuid::new_v4().to_string(),
            alert_type: request.alert_type,
            severity: request.severity,
            customer_id: request.customer_id,
            transaction_id: request.transaction_id,
            description: request.description,
            metadata: request.metadata,
            created_at: Utc::now(),
        };
        self.alerts.write().await.push(alert.clone());
        Ok(alert)
    }
}

/// The compliance gate consumed by the transaction processor (§4.8). Treated
/// as a black box: the core only ever sees `(action, violations)`.
#[async_trait]
pub trait ComplianceGate: Send + Sync {
    async fn check_transaction_compliance(
        &self,
        request: TransactionComplianceRequest,
    ) -> ComplianceResult<(ComplianceAction, Vec<String>)>;
}

#[derive(Clone)]
pub struct ComplianceEngine {
    store: Arc<dyn ComplianceRuleStore>,
    event_sink: Arc<dyn ComplianceEventSink>,
}

impl ComplianceEngine {
    pub fn new(store: Arc<dyn ComplianceRuleStore>) -> Self {
        Self {
            store,
            event_sink: Arc::new(NoopComplianceEventSink),
        }
    }

    pub fn with_event_sink(
        store: Arc<dyn ComplianceRuleStore>,
        event_sink: Arc<dyn ComplianceEventSink>,
    ) -> Self {
        Self { store, event_sink }
    }
}

#[async_trait]
impl ComplianceGate for ComplianceEngine {
    async fn check_transaction_compliance(
        &self,
        request: TransactionComplianceRequest,
    ) -> ComplianceResult<(ComplianceAction, Vec<String>)> {
        if request.currency.trim().is_empty() {
            return Err(ComplianceError::Validation(
                "transaction currency cannot be empty".into(),
            ));
        }

        let rules = self.store.get_rules().await?;
        let outcome = rules.evaluate(&request);

        self.event_sink
            .record(ComplianceCheckEvent {
                transaction_id: request.transaction_id,
                customer_id: request.customer_id,
                account_id: request.account_id,
                amount_minor: request.amount_minor,
                action: outcome.action,
                violations: outcome.violations.clone(),
                checked_at: Utc::now(),
            })
            .await;

        Ok((outcome.action, outcome.violations))
    }
}
