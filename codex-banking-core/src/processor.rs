//! Drives a [`Transaction`] through the lifecycle described in §4.9: create,
//! screen, post, and (on any failure inside the atomic scope) roll back to
//! FAILED. Grounded on the source's `TransactionProcessor`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use codex_audit_log::AppendRequest;
use codex_audit_log::AuditLog;
use codex_compliance::ComplianceAction;
use codex_compliance::ComplianceGate;
use codex_compliance::TransactionComplianceRequest;
use codex_event_bus::FraudDecisionUpdate;
use codex_event_bus::TransactionMetadataSink;
use codex_event_bus::TransactionMetadataSinkError;
use codex_events::EventDispatcher;
use codex_events::create_transaction_event;
use codex_fraud_client::FraudDecision;
use codex_fraud_client::FraudScorer;
use codex_fraud_client::TransactionScoringRequest;
use codex_ledger::AccountBalanceRequest;
use codex_ledger::Currency as LedgerCurrency;
use codex_ledger::EntryOrigin;
use codex_ledger::EntryStatus;
use codex_ledger::JournalEntry;
use codex_ledger::JournalLine;
use codex_ledger::LedgerService;
use codex_ledger::PostEntryRequest;
use codex_ledger::PostingMode;
use codex_ledger::PostingSide;
use codex_ledger::ReconciliationStatus;
use codex_ledger::Role as LedgerRole;
use codex_ledger::TenantContext as LedgerTenantContext;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use crate::AccountDirectory;
use crate::AccountId;
use crate::BankingError;
use crate::BankingResult;
use crate::FraudMetadata;
use crate::Transaction;
use crate::TransactionChannel;
use crate::TransactionId;
use crate::TransactionState;
use crate::TransactionType;
use crate::storage::InMemoryStorage;
use crate::storage::Storage as StorageTrait;

pub const SYSTEM_EXTERNAL_DEPOSITS: &str = "EXT_DEP_001";
pub const SYSTEM_EXTERNAL_WITHDRAWALS: &str = "EXT_WITH_001";
pub const SYSTEM_EXTERNAL_PAYMENTS: &str = "EXT_PAY_001";
pub const SYSTEM_FEE_INCOME: &str = "FEE_INC_001";
pub const SYSTEM_INTEREST_EXPENSE: &str = "INT_EXP_001";
pub const SYSTEM_INTEREST_INCOME: &str = "INT_INC_001";

/// The six bookkeeping accounts a deployment must seed in the ledger before
/// any externally-originated transaction can post.
pub const SYSTEM_ACCOUNT_IDS: [&str; 6] = [
    SYSTEM_EXTERNAL_DEPOSITS,
    SYSTEM_EXTERNAL_WITHDRAWALS,
    SYSTEM_EXTERNAL_PAYMENTS,
    SYSTEM_FEE_INCOME,
    SYSTEM_INTEREST_EXPENSE,
    SYSTEM_INTEREST_INCOME,
];

/// A loan account's `WITHDRAWAL` (disbursement) is capped against this flat
/// ceiling instead of an available-balance check (§4.9 step 5).
const LOAN_DISBURSEMENT_CAP_MINOR: i64 = 1_000_000_00;

const TABLE: &str = "transactions";

pub struct CreateTransactionRequest {
    pub transaction_type: TransactionType,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub channel: TransactionChannel,
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub reference: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: HashMap<String, String>,
}

fn format_minor(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let absolute = amount_minor.unsigned_abs();
    format!("{sign}{}.{:02}", absolute / 100, absolute % 100)
}

fn derive_idempotency_key(request: &CreateTransactionRequest, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.transaction_type.as_str().as_bytes());
    hasher.update(request.from_account_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(request.to_account_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(request.amount_minor.to_be_bytes());
    hasher.update(request.currency.as_bytes());
    hasher.update(created_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect::<String>().chars().take(16).collect()
}

fn compliance_action_str(action: ComplianceAction) -> &'static str {
    match action {
        ComplianceAction::Allow => "ALLOW",
        ComplianceAction::Flag => "FLAG",
        ComplianceAction::Block => "BLOCK",
    }
}

fn ledger_currency(code: &str) -> LedgerCurrency {
    LedgerCurrency {
        code: code.to_string(),
        precision: 2,
    }
}

fn transaction_event_data(txn: &Transaction) -> Value {
    json!({
        "transaction_id": txn.id,
        "transaction_type": txn.transaction_type.as_str(),
        "amount": format_minor(txn.amount_minor),
        "currency": txn.currency,
        "from_account_id": txn.from_account_id,
        "to_account_id": txn.to_account_id,
        "state": txn.state.as_str(),
        "reference": txn.reference,
        "channel": txn.channel.as_str(),
        "idempotency_key": txn.idempotency_key,
        "journal_entry_id": txn.journal_entry_id,
        "error_message": txn.error_message,
        "needs_review": txn.needs_review,
    })
}

impl Transaction {
    fn to_record(&self) -> Value {
        json!({
            "id": self.id,
            "transaction_type": self.transaction_type.as_str(),
            "from_account_id": self.from_account_id,
            "to_account_id": self.to_account_id,
            "amount_minor": self.amount_minor,
            "currency": self.currency,
            "description": self.description,
            "reference": self.reference,
            "idempotency_key": self.idempotency_key,
            "channel": self.channel.as_str(),
            "state": self.state.as_str(),
            "journal_entry_id": self.journal_entry_id,
            "reversal_transaction_id": self.reversal_transaction_id,
            "original_transaction_id": self.original_transaction_id,
            "created_at": self.created_at.to_rfc3339(),
            "processed_at": self.processed_at.map(|value| value.to_rfc3339()),
            "error_message": self.error_message,
            "compliance_checked": self.compliance_checked,
            "compliance_action": self.compliance_action,
            "compliance_violations": self.compliance_violations,
            "fraud_score": self.fraud_metadata.score,
            "fraud_decision": self.fraud_metadata.decision,
            "fraud_risk_level": self.fraud_metadata.risk_level,
            "fraud_reasons": self.fraud_metadata.reasons,
            "fraud_latency_ms": self.fraud_metadata.latency_ms,
            "needs_review": self.needs_review,
            "user_metadata": self.user_metadata,
        })
    }

    fn from_record(value: &Value) -> BankingResult<Self> {
        let require_str = |key: &str| -> BankingResult<String> {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BankingError::Storage(format!("transaction record missing {key}")))
        };
        let optional_str =
            |key: &str| -> Option<String> { value.get(key).and_then(Value::as_str).map(str::to_string) };
        let parse_timestamp = |raw: &str| -> BankingResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|err| BankingError::Storage(err.to_string()))
        };

        let processed_at = match value.get("processed_at").and_then(Value::as_str) {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };

        Ok(Self {
            id: require_str("id")?,
            transaction_type: TransactionType::parse(&require_str("transaction_type")?)?,
            from_account_id: optional_str("from_account_id"),
            to_account_id: optional_str("to_account_id"),
            amount_minor: value
                .get("amount_minor")
                .and_then(Value::as_i64)
                .ok_or_else(|| BankingError::Storage("transaction record missing amount_minor".into()))?,
            currency: require_str("currency")?,
            description: optional_str("description").unwrap_or_default(),
            reference: optional_str("reference"),
            idempotency_key: require_str("idempotency_key")?,
            channel: TransactionChannel::parse(&require_str("channel")?)?,
            state: TransactionState::parse(&require_str("state")?)?,
            journal_entry_id: optional_str("journal_entry_id"),
            reversal_transaction_id: optional_str("reversal_transaction_id"),
            original_transaction_id: optional_str("original_transaction_id"),
            created_at: parse_timestamp(&require_str("created_at")?)?,
            processed_at,
            error_message: optional_str("error_message"),
            compliance_checked: value.get("compliance_checked").and_then(Value::as_bool).unwrap_or(false),
            compliance_action: optional_str("compliance_action"),
            compliance_violations: value
                .get("compliance_violations")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            fraud_metadata: FraudMetadata {
                score: value.get("fraud_score").and_then(Value::as_f64),
                decision: optional_str("fraud_decision"),
                risk_level: optional_str("fraud_risk_level"),
                reasons: value
                    .get("fraud_reasons")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
                latency_ms: value.get("fraud_latency_ms").and_then(Value::as_i64),
            },
            needs_review: value.get("needs_review").and_then(Value::as_bool).unwrap_or(false),
            user_metadata: value
                .get("user_metadata")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(key, val)| val.as_str().map(|s| (key.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

/// Dr/Cr account pair for a (non-reversal) transaction type, per §4.9's
/// posting table.
fn posting_accounts(
    transaction_type: TransactionType,
    from_account_id: Option<&str>,
    to_account_id: Option<&str>,
) -> BankingResult<(String, String)> {
    let from = || {
        from_account_id
            .map(str::to_string)
            .ok_or_else(|| BankingError::Validation("transaction requires a from-account".into()))
    };
    let to = || {
        to_account_id
            .map(str::to_string)
            .ok_or_else(|| BankingError::Validation("transaction requires a to-account".into()))
    };

    match transaction_type {
        TransactionType::Deposit => Ok((to()?, SYSTEM_EXTERNAL_DEPOSITS.to_string())),
        TransactionType::Withdrawal => Ok((SYSTEM_EXTERNAL_WITHDRAWALS.to_string(), from()?)),
        TransactionType::TransferInternal => Ok((to()?, from()?)),
        TransactionType::Payment => Ok((SYSTEM_EXTERNAL_PAYMENTS.to_string(), from()?)),
        TransactionType::Fee => Ok((SYSTEM_FEE_INCOME.to_string(), from()?)),
        TransactionType::InterestCredit => Ok((to()?, SYSTEM_INTEREST_EXPENSE.to_string())),
        TransactionType::InterestDebit => Ok((SYSTEM_INTEREST_INCOME.to_string(), from()?)),
        other => Err(BankingError::Validation(format!(
            "unsupported transaction type for posting: {}",
            other.as_str()
        ))),
    }
}

/// Carries the in-progress `Transaction` (with whatever compliance/fraud
/// metadata had already been recorded on it) out of a rolled-back `atomic`
/// scope alongside the error that aborted it, so the FAILED record saved
/// after rollback reflects that accumulated metadata instead of the
/// pristine pre-processing snapshot.
struct ProcessingFailure {
    error: BankingError,
    transaction: Transaction,
}

/// The core's heart (§2): accepts transactions, idempotently persists them,
/// and drives them through compliance, fraud, and ledger posting under a
/// single atomic storage scope.
pub struct TransactionProcessor {
    storage: Arc<InMemoryStorage>,
    ledger: Arc<dyn LedgerService>,
    accounts: Arc<dyn AccountDirectory>,
    dispatcher: Arc<dyn EventDispatcher>,
    audit_log: Arc<dyn AuditLog>,
    compliance: Arc<dyn ComplianceGate>,
    fraud: Arc<dyn FraudScorer>,
    company_id: String,
    journal_id: String,
}

impl TransactionProcessor {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<InMemoryStorage>,
        ledger: Arc<dyn LedgerService>,
        accounts: Arc<dyn AccountDirectory>,
        dispatcher: Arc<dyn EventDispatcher>,
        audit_log: Arc<dyn AuditLog>,
        compliance: Arc<dyn ComplianceGate>,
        fraud: Arc<dyn FraudScorer>,
        company_id: impl Into<String>,
        journal_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            ledger,
            accounts,
            dispatcher,
            audit_log,
            compliance,
            fraud,
            company_id: company_id.into(),
            journal_id: journal_id.into(),
        }
    }

    fn tenant(&self) -> LedgerTenantContext {
        LedgerTenantContext {
            tenant_id: self.company_id.clone(),
            user_id: "transaction-processor".to_string(),
            roles: vec![LedgerRole::ServiceAccount],
            locale: None,
        }
    }

    async fn save_transaction(&self, transaction: &Transaction) -> BankingResult<()> {
        StorageTrait::save(&*self.storage, TABLE, &transaction.id, transaction.to_record())
            .await
            .map_err(BankingError::from)
    }

    async fn load_transaction(&self, id: &str) -> BankingResult<Option<Transaction>> {
        let record = StorageTrait::load(&*self.storage, TABLE, id).await.map_err(BankingError::from)?;
        record.as_ref().map(Transaction::from_record).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> BankingResult<Option<Transaction>> {
        let key = key.to_string();
        let matches = StorageTrait::find(&*self.storage, TABLE, &move |value| {
            value.get("idempotency_key").and_then(Value::as_str) == Some(key.as_str())
        })
        .await
        .map_err(BankingError::from)?;

        matches.first().map(Transaction::from_record).transpose()
    }

    async fn audit(&self, entity_id: &str, action: &str, metadata: Value) {
        let request = AppendRequest {
            entity_type: "transaction".to_string(),
            entity_id: entity_id.to_string(),
            actor: "transaction-processor".to_string(),
            action: action.to_string(),
            metadata,
        };
        if let Err(err) = self.audit_log.append(request).await {
            tracing::error!(entity_id, action, error = %err, "failed to append audit record");
        }
    }

    /// Validates, derives defaults, short-circuits on a repeated idempotency
    /// key, and persists a new transaction in the PENDING state (§4.9 steps
    /// 1-2).
    pub async fn create_transaction(&self, request: CreateTransactionRequest) -> BankingResult<Transaction> {
        if request.amount_minor <= 0 {
            return Err(BankingError::Validation("transaction amount must be positive".into()));
        }
        if request.from_account_id.is_none() && request.to_account_id.is_none() {
            return Err(BankingError::Validation(
                "transaction must reference at least one account".into(),
            ));
        }
        if request.currency.trim().is_empty() {
            return Err(BankingError::Validation("transaction currency must be provided".into()));
        }

        let created_at = Utc::now();
        let idempotency_key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| derive_idempotency_key(&request, created_at));

        if let Some(existing) = self.find_by_idempotency_key(&idempotency_key).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4().to_string();
        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| format!("{}-{}", request.transaction_type.as_str(), &id[..8]));

        let transaction = Transaction {
            id: id.clone(),
            transaction_type: request.transaction_type,
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount_minor: request.amount_minor,
            currency: request.currency,
            description: request.description,
            reference: Some(reference),
            idempotency_key,
            channel: request.channel,
            state: TransactionState::Pending,
            journal_entry_id: None,
            reversal_transaction_id: None,
            original_transaction_id: None,
            created_at,
            processed_at: None,
            error_message: None,
            compliance_checked: false,
            compliance_action: None,
            compliance_violations: Vec::new(),
            fraud_metadata: FraudMetadata::default(),
            needs_review: false,
            user_metadata: request.metadata,
        };

        self.save_transaction(&transaction).await?;
        self.audit(&transaction.id, "TRANSACTION_CREATED", transaction_event_data(&transaction)).await;
        self.dispatcher.publish(create_transaction_event(
            codex_events::DomainEvent::TransactionCreated,
            transaction.id.clone(),
            transaction_event_data(&transaction),
        ));

        Ok(transaction)
    }

    async fn run_compliance(&self, transaction: &Transaction) -> BankingResult<(ComplianceAction, Vec<String>)> {
        let primary_account = transaction
            .from_account_id
            .clone()
            .or_else(|| transaction.to_account_id.clone())
            .ok_or_else(|| BankingError::Validation("transaction has no account to screen".into()))?;

        let customer_id = match self.accounts.resolve(&primary_account).await {
            Ok(view) => view.customer_id.unwrap_or_else(|| primary_account.clone()),
            Err(_) => primary_account.clone(),
        };

        let request = TransactionComplianceRequest {
            customer_id,
            account_id: primary_account,
            amount_minor: transaction.amount_minor,
            currency: transaction.currency.clone(),
            transaction_type: transaction.transaction_type.as_str().to_string(),
            transaction_id: transaction.id.clone(),
        };

        self.compliance.check_transaction_compliance(request).await.map_err(BankingError::from)
    }

    async fn run_fraud_scoring(&self, transaction: &Transaction) -> codex_fraud_client::FraudScore {
        let request = TransactionScoringRequest {
            transaction_id: transaction.id.clone(),
            customer_id: transaction
                .from_account_id
                .clone()
                .or_else(|| transaction.to_account_id.clone())
                .unwrap_or_default(),
            amount: transaction.amount_minor as f64 / 100.0,
            currency: transaction.currency.clone(),
            merchant_id: None,
            merchant_category: None,
            channel: transaction.channel.as_str().to_string(),
            country: None,
            timestamp: transaction.created_at,
            transaction_type: transaction.transaction_type.as_str().to_string(),
            description: transaction.description.clone(),
            metadata: Value::Null,
        };

        self.fraud.score(request).await
    }

    async fn validate_accounts(&self, transaction: &Transaction) -> BankingResult<()> {
        if let Some(from_id) = &transaction.from_account_id {
            let account = self.accounts.resolve(from_id).await?;
            if !account.is_active {
                return Err(BankingError::Validation(format!("account {from_id} cannot be debited")));
            }

            if account.is_loan_account {
                if transaction.amount_minor > LOAN_DISBURSEMENT_CAP_MINOR {
                    return Err(BankingError::Validation(format!(
                        "loan amount {} exceeds maximum loan limit",
                        format_minor(transaction.amount_minor)
                    )));
                }
            } else {
                let balance = self
                    .ledger
                    .account_balance(AccountBalanceRequest {
                        account_id: from_id.clone(),
                        holds_minor: 0,
                        tenant: self.tenant(),
                    })
                    .await?;
                if balance.available_balance_minor < transaction.amount_minor {
                    return Err(BankingError::Validation(format!(
                        "Insufficient funds: available {}, requested {}",
                        format_minor(balance.available_balance_minor),
                        format_minor(transaction.amount_minor)
                    )));
                }
            }
        }

        if let Some(to_id) = &transaction.to_account_id {
            let account = self.accounts.resolve(to_id).await?;
            if !account.is_active {
                return Err(BankingError::Validation(format!("account {to_id} cannot be credited")));
            }
        }

        Ok(())
    }

    async fn build_journal_entry(&self, transaction: &Transaction) -> BankingResult<JournalEntry> {
        let (debit_account, credit_account) = if transaction.transaction_type == TransactionType::Reversal {
            let original_id = transaction.original_transaction_id.clone().ok_or_else(|| {
                BankingError::Validation("reversal transaction must have an original_transaction_id".into())
            })?;
            let original = self
                .load_transaction(&original_id)
                .await?
                .ok_or_else(|| BankingError::NotFound(format!("transaction {original_id}")))?;
            if !original.transaction_type.supports_reversal() {
                return Err(BankingError::Validation(format!(
                    "reversal not supported for transaction type {}",
                    original.transaction_type.as_str()
                )));
            }
            let (original_debit, original_credit) = posting_accounts(
                original.transaction_type,
                original.from_account_id.as_deref(),
                original.to_account_id.as_deref(),
            )?;
            (original_credit, original_debit)
        } else {
            posting_accounts(
                transaction.transaction_type,
                transaction.from_account_id.as_deref(),
                transaction.to_account_id.as_deref(),
            )?
        };

        let currency = ledger_currency(&transaction.currency);
        let memo = Some(format!("{}: {}", transaction.transaction_type.as_str(), transaction.description));
        let origin = if transaction.transaction_type == TransactionType::Reversal {
            EntryOrigin::Adjustment
        } else {
            EntryOrigin::Manual
        };

        Ok(JournalEntry {
            id: format!("je-{}", transaction.id),
            journal_id: self.journal_id.clone(),
            status: EntryStatus::Draft,
            reconciliation_status: ReconciliationStatus::Unreconciled,
            lines: vec![
                JournalLine {
                    id: format!("{}-dr", transaction.id),
                    account_id: debit_account,
                    side: PostingSide::Debit,
                    amount_minor: transaction.amount_minor,
                    currency: currency.clone(),
                    functional_amount_minor: transaction.amount_minor,
                    functional_currency: currency.clone(),
                    exchange_rate: None,
                    tax_code: None,
                    memo: memo.clone(),
                },
                JournalLine {
                    id: format!("{}-cr", transaction.id),
                    account_id: credit_account,
                    side: PostingSide::Credit,
                    amount_minor: transaction.amount_minor,
                    currency: currency.clone(),
                    functional_amount_minor: transaction.amount_minor,
                    functional_currency: currency,
                    exchange_rate: None,
                    tax_code: None,
                    memo: memo.clone(),
                },
            ],
            origin,
            memo: Some(transaction.reference.clone().unwrap_or_else(|| transaction.id.clone())),
            reverses_entry_id: None,
            reversed_by_entry_id: None,
        })
    }

    /// Loads a PENDING transaction and drives it, inside a single atomic
    /// storage scope, through compliance, fraud screening, account
    /// validation, and ledger posting (§4.9 steps 3-7). Any failure inside
    /// the scope discards every write made within it; the transaction is
    /// then separately saved as FAILED, carrying whatever compliance/fraud
    /// metadata had already accumulated on it before the failure.
    pub async fn process_transaction(&self, id: &str) -> BankingResult<Transaction> {
        let loaded = self
            .load_transaction(id)
            .await?
            .ok_or_else(|| BankingError::NotFound(format!("transaction {id}")))?;

        if loaded.state != TransactionState::Pending {
            return Err(BankingError::State(format!("transaction {id} is not in PENDING state")));
        }

        let outcome: Result<Transaction, ProcessingFailure> = self
            .storage
            .atomic(|handle| {
                let mut transaction = loaded.clone();
                async move {
                    transaction.state = TransactionState::Processing;
                    handle.save(TABLE, &transaction.id, transaction.to_record()).await;

                    let skip_screening = transaction.channel == TransactionChannel::System
                        || transaction.transaction_type == TransactionType::Reversal;

                    if skip_screening {
                        transaction.compliance_checked = true;
                        transaction.compliance_action = Some("ALLOW".to_string());
                    } else {
                        let (action, violations) = match self.run_compliance(&transaction).await {
                            Ok(outcome) => outcome,
                            Err(error) => return Err(ProcessingFailure { error, transaction }),
                        };
                        transaction.compliance_checked = true;
                        transaction.compliance_action = Some(compliance_action_str(action).to_string());
                        transaction.compliance_violations = violations;
                        if action == ComplianceAction::Block {
                            let error = BankingError::ComplianceBlock {
                                violations: transaction.compliance_violations.clone(),
                            };
                            return Err(ProcessingFailure { error, transaction });
                        }
                    }

                    if !skip_screening {
                        let score = self.run_fraud_scoring(&transaction).await;
                        transaction.fraud_metadata = FraudMetadata {
                            score: Some(score.score),
                            decision: Some(score.decision.as_str().to_string()),
                            risk_level: Some(score.risk_level.as_str().to_string()),
                            reasons: score.reasons.clone(),
                            latency_ms: Some(score.latency.as_millis() as i64),
                        };
                        match score.decision {
                            FraudDecision::Block => {
                                let error = BankingError::FraudBlock { reasons: score.reasons };
                                return Err(ProcessingFailure { error, transaction });
                            }
                            FraudDecision::Review => transaction.needs_review = true,
                            FraudDecision::Approve => {}
                        }
                    }

                    if let Err(error) = self.validate_accounts(&transaction).await {
                        return Err(ProcessingFailure { error, transaction });
                    }

                    let entry = match self.build_journal_entry(&transaction).await {
                        Ok(entry) => entry,
                        Err(error) => return Err(ProcessingFailure { error, transaction }),
                    };
                    let posted = match self
                        .ledger
                        .post_entry(PostEntryRequest {
                            entry,
                            tenant: self.tenant(),
                            mode: PostingMode::Commit,
                        })
                        .await
                    {
                        Ok(posted) => posted,
                        Err(error) => return Err(ProcessingFailure { error: error.into(), transaction }),
                    };

                    transaction.journal_entry_id = Some(posted.id);
                    transaction.state = TransactionState::Completed;
                    transaction.processed_at = Some(Utc::now());
                    handle.save(TABLE, &transaction.id, transaction.to_record()).await;

                    Ok(transaction)
                }
            })
            .await;

        match outcome {
            Ok(transaction) => {
                self.audit(&transaction.id, "TRANSACTION_POSTED", transaction_event_data(&transaction)).await;
                self.dispatcher.publish(create_transaction_event(
                    codex_events::DomainEvent::TransactionPosted,
                    transaction.id.clone(),
                    transaction_event_data(&transaction),
                ));
                Ok(transaction)
            }
            Err(failure) => {
                let mut failed = failure.transaction;
                failed.state = TransactionState::Failed;
                failed.error_message = Some(failure.error.to_string());
                failed.processed_at = Some(Utc::now());
                self.save_transaction(&failed).await?;
                self.audit(&failed.id, "TRANSACTION_FAILED", transaction_event_data(&failed)).await;
                self.dispatcher.publish(create_transaction_event(
                    codex_events::DomainEvent::TransactionFailed,
                    failed.id.clone(),
                    transaction_event_data(&failed),
                ));
                Err(failure.error)
            }
        }
    }

    /// Reverses a COMPLETED, reversal-eligible transaction exactly once
    /// (§4.9 step 8): creates and processes a REVERSAL transaction with
    /// from/to swapped, then links the original as REVERSED.
    pub async fn reverse_transaction(&self, original_id: &str, reason: &str) -> BankingResult<Transaction> {
        let original = self
            .load_transaction(original_id)
            .await?
            .ok_or_else(|| BankingError::NotFound(format!("transaction {original_id}")))?;

        if original.state != TransactionState::Completed {
            return Err(BankingError::State(format!("transaction {original_id} cannot be reversed")));
        }
        if original.reversal_transaction_id.is_some() {
            return Err(BankingError::State(format!("transaction {original_id} cannot be reversed")));
        }
        if !original.transaction_type.supports_reversal() {
            return Err(BankingError::Validation(format!(
                "reversal not supported for transaction type {}",
                original.transaction_type.as_str()
            )));
        }

        let reference = format!("REV-{}", original.reference.clone().unwrap_or_else(|| original.id.clone()));
        let mut metadata = HashMap::new();
        metadata.insert("original_transaction_id".to_string(), original.id.clone());
        metadata.insert("reversal_reason".to_string(), reason.to_string());

        let mut reversal = self
            .create_transaction(CreateTransactionRequest {
                transaction_type: TransactionType::Reversal,
                amount_minor: original.amount_minor,
                currency: original.currency.clone(),
                description: format!("REVERSAL: {reason}"),
                channel: TransactionChannel::System,
                from_account_id: original.to_account_id.clone(),
                to_account_id: original.from_account_id.clone(),
                reference: Some(reference),
                idempotency_key: None,
                metadata,
            })
            .await?;

        reversal.original_transaction_id = Some(original.id.clone());
        self.save_transaction(&reversal).await?;

        let processed = self.process_transaction(&reversal.id).await?;

        let mut original_after = original;
        original_after.state = TransactionState::Reversed;
        original_after.reversal_transaction_id = Some(processed.id.clone());
        self.save_transaction(&original_after).await?;

        self.audit(
            &original_after.id,
            "TRANSACTION_REVERSED",
            json!({
                "reversal_transaction_id": processed.id,
                "reason": reason,
            }),
        )
        .await;
        self.dispatcher.publish(create_transaction_event(
            codex_events::DomainEvent::TransactionReversed,
            original_after.id.clone(),
            transaction_event_data(&original_after),
        ));

        Ok(processed)
    }

    pub async fn deposit(
        &self,
        account_id: impl Into<AccountId>,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> BankingResult<Transaction> {
        self.create_transaction(CreateTransactionRequest {
            transaction_type: TransactionType::Deposit,
            amount_minor,
            currency: currency.into(),
            description: description.into(),
            channel,
            from_account_id: None,
            to_account_id: Some(account_id.into()),
            reference: None,
            idempotency_key: None,
            metadata: HashMap::new(),
        })
        .await
    }

    pub async fn withdraw(
        &self,
        account_id: impl Into<AccountId>,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> BankingResult<Transaction> {
        self.create_transaction(CreateTransactionRequest {
            transaction_type: TransactionType::Withdrawal,
            amount_minor,
            currency: currency.into(),
            description: description.into(),
            channel,
            from_account_id: Some(account_id.into()),
            to_account_id: None,
            reference: None,
            idempotency_key: None,
            metadata: HashMap::new(),
        })
        .await
    }

    /// Checks currency compatibility before any persistence — a mismatch
    /// must never create even a PENDING record (§4.9 scenario 4).
    pub async fn transfer(
        &self,
        from_account_id: impl Into<AccountId>,
        to_account_id: impl Into<AccountId>,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> BankingResult<Transaction> {
        let from_account_id = from_account_id.into();
        let to_account_id = to_account_id.into();

        let from_view = self.accounts.resolve(&from_account_id).await?;
        let to_view = self.accounts.resolve(&to_account_id).await?;
        if from_view.currency != to_view.currency {
            return Err(BankingError::Validation(format!(
                "cannot transfer between accounts with different currencies: {} -> {}",
                from_view.currency, to_view.currency
            )));
        }

        self.create_transaction(CreateTransactionRequest {
            transaction_type: TransactionType::TransferInternal,
            amount_minor,
            currency: currency.into(),
            description: description.into(),
            channel,
            from_account_id: Some(from_account_id),
            to_account_id: Some(to_account_id),
            reference: None,
            idempotency_key: None,
            metadata: HashMap::new(),
        })
        .await
    }

    pub async fn get_transaction(&self, id: &str) -> BankingResult<Transaction> {
        self.load_transaction(id).await?.ok_or_else(|| BankingError::NotFound(format!("transaction {id}")))
    }

    /// Every transaction touching `account_id`, most recent first.
    pub async fn get_account_transactions(&self, account_id: &str) -> BankingResult<Vec<Transaction>> {
        let records = StorageTrait::load_all(&*self.storage, TABLE).await.map_err(BankingError::from)?;
        let mut transactions =
            records.iter().map(Transaction::from_record).collect::<BankingResult<Vec<_>>>()?;

        transactions.retain(|transaction| {
            transaction.from_account_id.as_deref() == Some(account_id)
                || transaction.to_account_id.as_deref() == Some(account_id)
        });
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }
}

/// Lets the fraud-event bridge (§4.10) write an asynchronously-arriving
/// scoring decision back onto the originating transaction.
#[async_trait]
impl TransactionMetadataSink for TransactionProcessor {
    async fn record_fraud_decision(
        &self,
        transaction_id: &str,
        update: FraudDecisionUpdate,
    ) -> Result<(), TransactionMetadataSinkError> {
        let mut transaction = self
            .load_transaction(transaction_id)
            .await
            .map_err(|err| TransactionMetadataSinkError::Storage(err.to_string()))?
            .ok_or_else(|| {
                TransactionMetadataSinkError::Storage(format!("transaction {transaction_id} not found"))
            })?;

        transaction.fraud_metadata = FraudMetadata {
            score: Some(update.score),
            decision: Some(update.decision),
            risk_level: Some(update.risk_level),
            reasons: update.reasons,
            latency_ms: None,
        };

        self.save_transaction(&transaction).await.map_err(|err| TransactionMetadataSinkError::Storage(err.to_string()))
    }
}
