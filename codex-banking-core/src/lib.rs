#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The transaction processor: the core's heart. Accepts transactions,
//! idempotently persists them, and drives them through compliance, fraud,
//! and ledger posting under a single atomic storage scope.

mod processor;
mod storage;

pub use processor::SYSTEM_EXTERNAL_DEPOSITS;
pub use processor::SYSTEM_EXTERNAL_PAYMENTS;
pub use processor::SYSTEM_EXTERNAL_WITHDRAWALS;
pub use processor::SYSTEM_FEE_INCOME;
pub use processor::SYSTEM_INTEREST_EXPENSE;
pub use processor::SYSTEM_INTEREST_INCOME;
pub use processor::CreateTransactionRequest;
pub use processor::TransactionProcessor;
pub use storage::AtomicHandle;
pub use storage::InMemoryStorage;
pub use storage::Storage;
pub use storage::StorageError;
pub use storage::StorageResult;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

pub type TransactionId = String;
pub type AccountId = String;

pub type BankingResult<T> = Result<T, BankingError>;

/// Error taxonomy for the transaction processor (§7). Fault strings the
/// testable scenarios assert on verbatim are kept exact.
#[derive(Debug, Error)]
pub enum BankingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("state error: {0}")]
    State(String),
    #[error("Blocked by compliance rules")]
    ComplianceBlock { violations: Vec<String> },
    #[error("Blocked by fraud detection")]
    FraudBlock { reasons: Vec<String> },
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for BankingError {
    fn from(err: StorageError) -> Self {
        BankingError::Storage(err.to_string())
    }
}

impl From<codex_ledger::LedgerError> for BankingError {
    fn from(err: codex_ledger::LedgerError) -> Self {
        BankingError::Ledger(err.to_string())
    }
}

impl From<codex_compliance::ComplianceError> for BankingError {
    fn from(err: codex_compliance::ComplianceError) -> Self {
        BankingError::Validation(err.to_string())
    }
}

/// Transaction types (closed set, §3). `TransferExternal` and `Adjustment`
/// are carried for vocabulary completeness but have no posting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    TransferInternal,
    Payment,
    Fee,
    InterestCredit,
    InterestDebit,
    Reversal,
    TransferExternal,
    Adjustment,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::TransferInternal => "TRANSFER_INTERNAL",
            Self::Payment => "PAYMENT",
            Self::Fee => "FEE",
            Self::InterestCredit => "INTEREST_CREDIT",
            Self::InterestDebit => "INTEREST_DEBIT",
            Self::Reversal => "REVERSAL",
            Self::TransferExternal => "TRANSFER_EXTERNAL",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    /// Types whose original postings can be mechanically reversed (§4.9,
    /// §9 resolved open question).
    #[must_use]
    pub fn supports_reversal(self) -> bool {
        matches!(
            self,
            Self::Deposit | Self::Withdrawal | Self::TransferInternal
        )
    }

    pub fn parse(value: &str) -> BankingResult<Self> {
        match value {
            "DEPOSIT" => Ok(Self::Deposit),
            "WITHDRAWAL" => Ok(Self::Withdrawal),
            "TRANSFER_INTERNAL" => Ok(Self::TransferInternal),
            "PAYMENT" => Ok(Self::Payment),
            "FEE" => Ok(Self::Fee),
            "INTEREST_CREDIT" => Ok(Self::InterestCredit),
            "INTEREST_DEBIT" => Ok(Self::InterestDebit),
            "REVERSAL" => Ok(Self::Reversal),
            "TRANSFER_EXTERNAL" => Ok(Self::TransferExternal),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            other => Err(BankingError::Storage(format!("unknown transaction_type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Processing,
    Completed,
    Failed,
    Reversed,
}

impl TransactionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Reversed => "REVERSED",
        }
    }

    pub fn parse(value: &str) -> BankingResult<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "REVERSED" => Ok(Self::Reversed),
            other => Err(BankingError::Storage(format!("unknown transaction state {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionChannel {
    Branch,
    Online,
    Atm,
    Mobile,
    Api,
    System,
}

impl TransactionChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "BRANCH",
            Self::Online => "ONLINE",
            Self::Atm => "ATM",
            Self::Mobile => "MOBILE",
            Self::Api => "API",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse(value: &str) -> BankingResult<Self> {
        match value {
            "BRANCH" => Ok(Self::Branch),
            "ONLINE" => Ok(Self::Online),
            "ATM" => Ok(Self::Atm),
            "MOBILE" => Ok(Self::Mobile),
            "API" => Ok(Self::Api),
            "SYSTEM" => Ok(Self::System),
            other => Err(BankingError::Storage(format!("unknown channel {other}"))),
        }
    }
}

/// Fraud-screening outcome carried on a transaction (§4.9 step 4). `latency_ms`
/// is unset when the metadata arrived asynchronously via the event bridge
/// rather than from a synchronous scorer call.
#[derive(Debug, Clone, PartialEq)]
pub struct FraudMetadata {
    pub score: Option<f64>,
    pub decision: Option<String>,
    pub risk_level: Option<String>,
    pub reasons: Vec<String>,
    pub latency_ms: Option<i64>,
}

impl Default for FraudMetadata {
    fn default() -> Self {
        Self {
            score: None,
            decision: None,
            risk_level: None,
            reasons: Vec::new(),
            latency_ms: None,
        }
    }
}

/// The transaction record (§3). Amounts are minor-unit integers; `currency`
/// is an ISO-4217-style code.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_type: TransactionType,
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub reference: Option<String>,
    pub idempotency_key: String,
    pub channel: TransactionChannel,
    pub state: TransactionState,
    pub journal_entry_id: Option<String>,
    pub reversal_transaction_id: Option<TransactionId>,
    pub original_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub compliance_checked: bool,
    pub compliance_action: Option<String>,
    pub compliance_violations: Vec<String>,
    pub fraud_metadata: FraudMetadata,
    pub needs_review: bool,
    pub user_metadata: HashMap<String, String>,
}

/// Narrow collaborator interface for resolving a banking-domain account to
/// its currency and posting eligibility; the account manager's own CRUD is
/// out of scope here (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountView {
    pub id: AccountId,
    pub customer_id: Option<String>,
    pub currency: String,
    pub is_loan_account: bool,
    pub outstanding_loan_minor: i64,
    pub is_active: bool,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn resolve(&self, account_id: &str) -> BankingResult<AccountView>;
}

/// In-memory directory sufficient for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: tokio::sync::RwLock<HashMap<AccountId, AccountView>>,
}

impl InMemoryAccountDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, account: AccountView) {
        self.accounts.write().await.insert(account.id.clone(), account);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn resolve(&self, account_id: &str) -> BankingResult<AccountView> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .cloned()
            .ok_or_else(|| BankingError::NotFound(format!("account {account_id}")))
    }
}
