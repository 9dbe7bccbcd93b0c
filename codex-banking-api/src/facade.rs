use std::sync::Arc;

use codex_access_control::AccessControlError;
use codex_access_control::AccessControlService;
use codex_access_control::AuthenticateRequest;
use codex_access_control::Permission;
use codex_access_control::Session;
use codex_access_control::UserId;
use codex_audit_log::AuditLog;
use codex_audit_log::AuditLogError;
use codex_audit_log::AuditLogFilter;
use codex_audit_log::AuditRecord;
use codex_banking_core::AccountId;
use codex_banking_core::BankingError;
use codex_banking_core::CreateTransactionRequest;
use codex_banking_core::Transaction;
use codex_banking_core::TransactionChannel;
use codex_banking_core::TransactionProcessor;
use codex_compliance::InMemoryAlertSink;
use codex_event_bus::EventBus;
use codex_event_bus::FraudEventBridge;
use codex_events::EventDispatcher;
use codex_ledger::AccountBalance;
use codex_ledger::AccountBalanceRequest;
use codex_ledger::LedgerError;
use codex_ledger::LedgerService;

use crate::BankingTelemetry;

#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error("access denied: missing permission {0:?}")]
    AccessDenied(Permission),
    #[error(transparent)]
    AccessControl(#[from] AccessControlError),
    #[error(transparent)]
    Banking(#[from] BankingError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
}

/// Composes every crate in the workspace into a single entry point,
/// mirroring the teacher's `LedgerFacade`: a thin permission-checking and
/// telemetry-recording layer in front of the collaborators that do the
/// actual work.
#[derive(Clone)]
pub struct BankingFacade {
    processor: Arc<TransactionProcessor>,
    access_control: Arc<dyn AccessControlService>,
    audit_log: Arc<dyn AuditLog>,
    ledger: Arc<dyn LedgerService>,
    telemetry: Option<Arc<BankingTelemetry>>,
}

impl BankingFacade {
    #[must_use]
    pub fn new(
        processor: Arc<TransactionProcessor>,
        access_control: Arc<dyn AccessControlService>,
        audit_log: Arc<dyn AuditLog>,
        ledger: Arc<dyn LedgerService>,
    ) -> Self {
        Self::with_telemetry(processor, access_control, audit_log, ledger, None)
    }

    #[must_use]
    pub fn with_telemetry(
        processor: Arc<TransactionProcessor>,
        access_control: Arc<dyn AccessControlService>,
        audit_log: Arc<dyn AuditLog>,
        ledger: Arc<dyn LedgerService>,
        telemetry: Option<Arc<BankingTelemetry>>,
    ) -> Self {
        Self {
            processor,
            access_control,
            audit_log,
            ledger,
            telemetry,
        }
    }

    /// Builds the event bridge (§4.10) wiring this facade's processor as the
    /// inbound fraud-decision sink. The caller owns starting/stopping it.
    #[must_use]
    pub fn event_bridge(
        &self,
        dispatcher: Arc<dyn EventDispatcher>,
        bus: Arc<dyn EventBus>,
    ) -> FraudEventBridge {
        FraudEventBridge::with_collaborators(
            dispatcher,
            bus,
            self.processor.clone(),
            Arc::new(InMemoryAlertSink::new()),
        )
    }

    async fn require(&self, user_id: &UserId, permission: Permission) -> Result<(), FacadeError> {
        if self.access_control.check_permission(user_id, permission).await? {
            Ok(())
        } else {
            Err(FacadeError::AccessDenied(permission))
        }
    }

    pub async fn create_transaction(
        &self,
        user_id: &UserId,
        request: CreateTransactionRequest,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::CreateTransaction).await?;
        let transaction = self.processor.create_transaction(request).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_created();
        }
        Ok(transaction)
    }

    pub async fn process_transaction(
        &self,
        user_id: &UserId,
        transaction_id: &str,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::CreateTransaction).await?;

        match self.processor.process_transaction(transaction_id).await {
            Ok(transaction) => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_completed();
                    if transaction.needs_review {
                        telemetry.record_needs_review();
                    }
                }
                Ok(transaction)
            }
            Err(err) => {
                if let Some(telemetry) = &self.telemetry {
                    match &err {
                        BankingError::ComplianceBlock { .. } => telemetry.record_compliance_block(),
                        BankingError::FraudBlock { .. } => telemetry.record_fraud_block(),
                        _ => {}
                    }
                    telemetry.record_failed();
                }
                Err(err.into())
            }
        }
    }

    pub async fn reverse_transaction(
        &self,
        user_id: &UserId,
        transaction_id: &str,
        reason: &str,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::ReverseTransaction).await?;
        let reversal = self.processor.reverse_transaction(transaction_id, reason).await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_reversed();
        }
        Ok(reversal)
    }

    pub async fn deposit(
        &self,
        user_id: &UserId,
        account_id: AccountId,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::CreateTransaction).await?;
        let transaction = self
            .processor
            .deposit(account_id, amount_minor, currency, description, channel)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_created();
        }
        Ok(transaction)
    }

    pub async fn withdraw(
        &self,
        user_id: &UserId,
        account_id: AccountId,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::CreateTransaction).await?;
        let transaction = self
            .processor
            .withdraw(account_id, amount_minor, currency, description, channel)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_created();
        }
        Ok(transaction)
    }

    pub async fn transfer(
        &self,
        user_id: &UserId,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount_minor: i64,
        currency: impl Into<String>,
        description: impl Into<String>,
        channel: TransactionChannel,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::CreateTransaction).await?;
        let transaction = self
            .processor
            .transfer(from_account_id, to_account_id, amount_minor, currency, description, channel)
            .await?;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_created();
        }
        Ok(transaction)
    }

    pub async fn get_transaction(
        &self,
        user_id: &UserId,
        transaction_id: &str,
    ) -> Result<Transaction, FacadeError> {
        self.require(user_id, Permission::ViewTransaction).await?;
        Ok(self.processor.get_transaction(transaction_id).await?)
    }

    pub async fn get_account_transactions(
        &self,
        user_id: &UserId,
        account_id: &str,
    ) -> Result<Vec<Transaction>, FacadeError> {
        self.require(user_id, Permission::ViewTransaction).await?;
        Ok(self.processor.get_account_transactions(account_id).await?)
    }

    pub async fn account_balance(
        &self,
        user_id: &UserId,
        request: AccountBalanceRequest,
    ) -> Result<AccountBalance, FacadeError> {
        self.require(user_id, Permission::ViewAccount).await?;
        Ok(self.ledger.account_balance(request).await?)
    }

    pub async fn list_audit_trail(
        &self,
        user_id: &UserId,
        filter: AuditLogFilter,
    ) -> Result<Vec<AuditRecord>, FacadeError> {
        self.require(user_id, Permission::ViewAuditLog).await?;
        Ok(self.audit_log.records(filter).await?)
    }

    /// Authentication sits outside the permission gate it enforces for
    /// everyone else.
    pub async fn authenticate(&self, request: AuthenticateRequest) -> Result<Session, FacadeError> {
        let result = self.access_control.authenticate(request).await;
        if result.is_err()
            && let Some(telemetry) = &self.telemetry
        {
            telemetry.record_login_lockout();
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_access_control::CreateRoleRequest;
    use codex_access_control::CreateUserRequest;
    use codex_access_control::InMemoryAccessControlService;
    use codex_access_control::Role;
    use codex_audit_log::InMemoryAuditLog;
    use codex_banking_core::AccountView;
    use codex_banking_core::InMemoryAccountDirectory;
    use codex_banking_core::InMemoryStorage;
    use codex_compliance::ComplianceEngine;
    use codex_compliance::InMemoryComplianceRuleStore;
    use codex_events::InMemoryEventDispatcher;
    use codex_fraud_client::MockFraudScorer;
    use codex_ledger::Account;
    use codex_ledger::AccountType;
    use codex_ledger::CreateCompanyRequest;
    use codex_ledger::CurrencyMode;
    use codex_ledger::FiscalCalendar;
    use codex_ledger::InMemoryLedgerService;
    use codex_ledger::Role as LedgerRole;
    use codex_ledger::TenantContext as LedgerTenantContext;
    use codex_ledger::UpsertAccountRequest;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    async fn harness() -> (BankingFacade, UserId) {
        let ledger: Arc<dyn LedgerService> = Arc::new(InMemoryLedgerService::default());
        let bootstrap = LedgerTenantContext {
            tenant_id: String::new(),
            user_id: "bootstrap".to_string(),
            roles: vec![LedgerRole::Admin],
            locale: None,
        };
        let company = ledger
            .create_company(CreateCompanyRequest {
                name: "Facade Bank".to_string(),
                base_currency: codex_ledger::Currency {
                    code: "USD".to_string(),
                    precision: 2,
                },
                fiscal_calendar: FiscalCalendar {
                    periods_per_year: 12,
                    opening_month: 1,
                },
                tenant: bootstrap,
            })
            .await
            .expect("create company");

        let tenant = LedgerTenantContext {
            tenant_id: company.id.clone(),
            user_id: "bootstrap".to_string(),
            roles: vec![LedgerRole::Admin],
            locale: None,
        };

        for account_id in ["acct-1", "EXT_DEP_001"] {
            ledger
                .upsert_account(UpsertAccountRequest {
                    account: Account {
                        id: account_id.to_string(),
                        company_id: company.id.clone(),
                        code: account_id.to_string(),
                        name: account_id.to_string(),
                        account_type: AccountType::Asset,
                        parent_account_id: None,
                        currency_mode: CurrencyMode::Transactional,
                        tax_code: None,
                        is_summary: false,
                        is_active: true,
                    },
                    tenant: tenant.clone(),
                })
                .await
                .expect("upsert account");
        }

        let directory = Arc::new(InMemoryAccountDirectory::new());
        directory
            .upsert(AccountView {
                id: "acct-1".to_string(),
                customer_id: Some("cust-1".to_string()),
                currency: "USD".to_string(),
                is_loan_account: false,
                outstanding_loan_minor: 0,
                is_active: true,
            })
            .await;

        let processor = Arc::new(TransactionProcessor::new(
            InMemoryStorage::shared(),
            ledger.clone(),
            directory,
            Arc::new(InMemoryEventDispatcher::new()),
            codex_audit_log::InMemoryAuditLog::shared(),
            Arc::new(ComplianceEngine::new(Arc::new(InMemoryComplianceRuleStore::new()))),
            Arc::new(MockFraudScorer),
            company.id.clone(),
            "jnl-gl",
        ));

        let access_control: Arc<dyn AccessControlService> = Arc::new(InMemoryAccessControlService::new());
        let teller_permissions: HashSet<Permission> =
            [Permission::CreateTransaction, Permission::ViewTransaction].into_iter().collect();
        let role = access_control
            .create_role(CreateRoleRequest {
                name: "Teller".to_string(),
                permissions: teller_permissions,
                transaction_limit_minor: None,
                approval_limit_minor: None,
            })
            .await
            .expect("create role");
        let user = access_control
            .create_user(CreateUserRequest {
                username: "teller".to_string(),
                password: "Sup3rSecret!23".to_string(),
                role_ids: vec![role.id.clone()],
            })
            .await
            .expect("create user");

        let audit_log: Arc<dyn AuditLog> = InMemoryAuditLog::shared();
        let facade = BankingFacade::new(processor, access_control, audit_log, ledger);
        (facade, user.id)
    }

    #[tokio::test]
    async fn deposit_and_process_requires_create_transaction_permission() {
        let (facade, teller) = harness().await;

        let created = facade
            .deposit(&teller, "acct-1".to_string(), 10_000, "USD", "payroll", TransactionChannel::Online)
            .await
            .expect("create deposit");

        let processed = facade.process_transaction(&teller, &created.id).await.expect("process");
        assert_eq!(processed.state.as_str(), "COMPLETED");
    }

    #[tokio::test]
    async fn user_without_reverse_permission_is_denied() {
        let (facade, teller) = harness().await;

        let created = facade
            .deposit(&teller, "acct-1".to_string(), 5_000, "USD", "payroll", TransactionChannel::Online)
            .await
            .expect("create deposit");
        facade.process_transaction(&teller, &created.id).await.expect("process");

        let err = facade.reverse_transaction(&teller, &created.id, "duplicate").await.unwrap_err();
        assert!(matches!(err, FacadeError::AccessDenied(Permission::ReverseTransaction)));
    }
}
