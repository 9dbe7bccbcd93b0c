//! Dotted, lower-case, producer-prefixed topic names (§6). Mirrors the
//! source's `KafkaTopics` enum, one constant per domain event kind, plus the
//! inbound contract shared with the fraud-scoring producer.

use codex_events::DomainEvent;

pub const TRANSACTIONS_CREATED: &str = "nexum.transactions.created";
pub const TRANSACTIONS_POSTED: &str = "nexum.transactions.posted";
pub const TRANSACTIONS_FAILED: &str = "nexum.transactions.failed";
pub const TRANSACTIONS_REVERSED: &str = "nexum.transactions.reversed";
pub const ACCOUNTS_CREATED: &str = "nexum.accounts.created";
pub const ACCOUNTS_UPDATED: &str = "nexum.accounts.updated";
pub const ACCOUNTS_CLOSED: &str = "nexum.accounts.closed";
pub const CUSTOMERS_CREATED: &str = "nexum.customers.created";
pub const CUSTOMERS_UPDATED: &str = "nexum.customers.updated";
pub const CUSTOMERS_KYC_CHANGED: &str = "nexum.customers.kyc_changed";
pub const LOANS_ORIGINATED: &str = "nexum.loans.originated";
pub const LOANS_DISBURSED: &str = "nexum.loans.disbursed";
pub const LOANS_PAYMENT: &str = "nexum.loans.payment";
pub const LOANS_PAID_OFF: &str = "nexum.loans.paid_off";
pub const LOANS_DEFAULTED: &str = "nexum.loans.defaulted";
pub const CREDIT_STATEMENT_GENERATED: &str = "nexum.credit.statement_generated";
pub const CREDIT_PAYMENT: &str = "nexum.credit.payment";
pub const COLLECTIONS_CASE_CREATED: &str = "nexum.collections.case_created";
pub const COLLECTIONS_CASE_ESCALATED: &str = "nexum.collections.case_escalated";
pub const COLLECTIONS_CASE_RESOLVED: &str = "nexum.collections.case_resolved";
pub const COMPLIANCE_ALERT: &str = "nexum.compliance.alert";
pub const COMPLIANCE_SUSPICIOUS_ACTIVITY: &str = "nexum.compliance.suspicious_activity";
pub const WORKFLOWS_STEP_COMPLETED: &str = "nexum.workflows.step_completed";
pub const WORKFLOWS_COMPLETED: &str = "nexum.workflows.completed";
pub const WORKFLOWS_REJECTED: &str = "nexum.workflows.rejected";

/// Inbound decision/alert contract from the external fraud-scoring producer.
pub const BASTION_DECISIONS_TOPIC: &str = "bastion.fraud.decisions";
pub const BASTION_ALERTS_TOPIC: &str = "bastion.fraud.alerts";

/// The outbound topic a domain event is mirrored onto, or `None` for event
/// kinds this core never publishes externally.
#[must_use]
pub const fn topic_for_domain_event(event: DomainEvent) -> &'static str {
    match event {
        DomainEvent::TransactionCreated => TRANSACTIONS_CREATED,
        DomainEvent::TransactionPosted => TRANSACTIONS_POSTED,
        DomainEvent::TransactionFailed => TRANSACTIONS_FAILED,
        DomainEvent::TransactionReversed => TRANSACTIONS_REVERSED,
        DomainEvent::AccountCreated => ACCOUNTS_CREATED,
        DomainEvent::AccountUpdated => ACCOUNTS_UPDATED,
        DomainEvent::AccountClosed => ACCOUNTS_CLOSED,
        DomainEvent::CustomerCreated => CUSTOMERS_CREATED,
        DomainEvent::CustomerUpdated => CUSTOMERS_UPDATED,
        DomainEvent::CustomerKycChanged => CUSTOMERS_KYC_CHANGED,
        DomainEvent::LoanOriginated => LOANS_ORIGINATED,
        DomainEvent::LoanDisbursed => LOANS_DISBURSED,
        DomainEvent::LoanPayment => LOANS_PAYMENT,
        DomainEvent::LoanPaidOff => LOANS_PAID_OFF,
        DomainEvent::LoanDefaulted => LOANS_DEFAULTED,
        DomainEvent::CreditStatement => CREDIT_STATEMENT_GENERATED,
        DomainEvent::CreditPayment => CREDIT_PAYMENT,
        DomainEvent::CollectionCaseCreated => COLLECTIONS_CASE_CREATED,
        DomainEvent::CollectionCaseEscalated => COLLECTIONS_CASE_ESCALATED,
        DomainEvent::CollectionCaseResolved => COLLECTIONS_CASE_RESOLVED,
        DomainEvent::ComplianceAlert => COMPLIANCE_ALERT,
        DomainEvent::ComplianceSuspicious => COMPLIANCE_SUSPICIOUS_ACTIVITY,
        DomainEvent::WorkflowStepCompleted => WORKFLOWS_STEP_COMPLETED,
        DomainEvent::WorkflowCompleted => WORKFLOWS_COMPLETED,
        DomainEvent::WorkflowRejected => WORKFLOWS_REJECTED,
    }
}
