#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

mod hashing;
mod in_memory;

pub use crate::in_memory::InMemoryAccessControlService;

pub type RoleId = String;
pub type UserId = String;
pub type SessionId = String;

pub type AccessControlResult<T> = Result<T, AccessControlError>;

#[derive(Debug, Error)]
pub enum AccessControlError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("password policy violation: {0}")]
    Policy(Vec<String>),
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Closed set of system permissions, mirroring the original RBAC module's
/// `Permission` enum category-for-category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    CreateAccount,
    ViewAccount,
    ModifyAccount,
    CloseAccount,
    CreateTransaction,
    ApproveTransaction,
    ReverseTransaction,
    ViewTransaction,
    CreateLoan,
    ApproveLoan,
    DisburseLoan,
    ViewLoan,
    WriteOffLoan,
    CreateCreditLine,
    ModifyCreditLimit,
    ViewCreditLine,
    CreateCustomer,
    ViewCustomer,
    ModifyCustomer,
    DeleteCustomer,
    CreateProduct,
    ModifyProduct,
    ActivateProduct,
    RetireProduct,
    ViewReports,
    CreateReports,
    ExportReports,
    StartWorkflow,
    ApproveWorkflowStep,
    ManageUsers,
    ManageRoles,
    ViewAuditLog,
    SystemConfig,
    ViewCollections,
    ManageCollections,
    AssignCollectors,
}

impl Permission {
    /// Every permission in the closed set, used to seed the ADMIN role.
    #[must_use]
    pub fn all() -> HashSet<Permission> {
        [
            Permission::CreateAccount,
            Permission::ViewAccount,
            Permission::ModifyAccount,
            Permission::CloseAccount,
            Permission::CreateTransaction,
            Permission::ApproveTransaction,
            Permission::ReverseTransaction,
            Permission::ViewTransaction,
            Permission::CreateLoan,
            Permission::ApproveLoan,
            Permission::DisburseLoan,
            Permission::ViewLoan,
            Permission::WriteOffLoan,
            Permission::CreateCreditLine,
            Permission::ModifyCreditLimit,
            Permission::ViewCreditLine,
            Permission::CreateCustomer,
            Permission::ViewCustomer,
            Permission::ModifyCustomer,
            Permission::DeleteCustomer,
            Permission::CreateProduct,
            Permission::ModifyProduct,
            Permission::ActivateProduct,
            Permission::RetireProduct,
            Permission::ViewReports,
            Permission::CreateReports,
            Permission::ExportReports,
            Permission::StartWorkflow,
            Permission::ApproveWorkflowStep,
            Permission::ManageUsers,
            Permission::ManageRoles,
            Permission::ViewAuditLog,
            Permission::SystemConfig,
            Permission::ViewCollections,
            Permission::ManageCollections,
            Permission::AssignCollectors,
        ]
        .into_iter()
        .collect()
    }
}

/// Which limit on a `Role` a given check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountLimitKind {
    Transaction,
    Approval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub permissions: HashSet<Permission>,
    pub is_system_role: bool,
    pub max_transaction_amount_minor: Option<i64>,
    pub max_approval_amount_minor: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    #[must_use]
    pub fn has_any_permission(&self, permissions: &HashSet<Permission>) -> bool {
        !self.permissions.is_disjoint(permissions)
    }

    #[must_use]
    pub fn has_all_permissions(&self, permissions: &HashSet<Permission>) -> bool {
        permissions.is_subset(&self.permissions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: String,
    pub permissions: HashSet<Permission>,
    pub max_transaction_amount_minor: Option<i64>,
    pub max_approval_amount_minor: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateRoleRequest {
    pub description: Option<String>,
    pub permissions: Option<HashSet<Permission>>,
    pub max_transaction_amount_minor: Option<i64>,
    pub max_approval_amount_minor: Option<i64>,
}

/// Active/locked/inactive collapsed into one state, rather than the two
/// independent booleans the source keeps (`is_active`, `is_locked`): the
/// state machine in the spec only ever wants one of three states at a
/// time, so a single enum makes the illegal fourth combination
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Locked,
    Inactive,
}

impl UserStatus {
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, UserStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role_ids: Vec<RoleId>,
    pub status: UserStatus,
    pub failed_login_attempts: u32,
    pub last_login: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub(crate) password_hash: Option<String>,
    pub(crate) password_salt: Option<String>,
    pub(crate) password_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn has_role(&self, role_id: &RoleId) -> bool {
        self.role_ids.iter().any(|id| id == role_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role_ids: Vec<RoleId>,
    pub created_by: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateRequest {
    pub username: String,
    pub password: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePasswordRequest {
    pub user_id: UserId,
    pub old_password: String,
    pub new_password: String,
}

/// Password policy configuration, defaults matching the original RBAC
/// module's `PasswordPolicy` dataclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    pub max_age_days: i64,
    pub history_count: usize,
    pub max_failed_attempts: u32,
    pub lockout_duration_minutes: i64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            max_age_days: 90,
            history_count: 5,
            max_failed_attempts: 5,
            lockout_duration_minutes: 30,
        }
    }
}

impl PasswordPolicy {
    const SPECIAL_CHARS: &'static str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

    /// Returns every violated rule; an empty vec means the password is
    /// acceptable.
    #[must_use]
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();

        if password.len() < self.min_length {
            violations.push(format!("minimum length {}", self.min_length));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push("must contain uppercase letter".into());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push("must contain lowercase letter".into());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("must contain digit".into());
        }
        if self.require_special && !password.chars().any(|c| Self::SPECIAL_CHARS.contains(c)) {
            violations.push("must contain special character".into());
        }

        violations
    }
}

#[async_trait]
pub trait AccessControlService: Send + Sync {
    async fn create_role(&self, request: CreateRoleRequest) -> AccessControlResult<Role>;

    async fn get_role(&self, role_id: &RoleId) -> AccessControlResult<Role>;

    async fn list_roles(&self) -> AccessControlResult<Vec<Role>>;

    async fn update_role(
        &self,
        role_id: &RoleId,
        request: UpdateRoleRequest,
    ) -> AccessControlResult<Role>;

    async fn delete_role(&self, role_id: &RoleId) -> AccessControlResult<()>;

    async fn create_user(&self, request: CreateUserRequest) -> AccessControlResult<User>;

    async fn get_user(&self, user_id: &UserId) -> AccessControlResult<User>;

    async fn get_user_by_username(&self, username: &str) -> AccessControlResult<User>;

    async fn list_users(&self) -> AccessControlResult<Vec<User>>;

    async fn update_user(
        &self,
        user_id: &UserId,
        request: UpdateUserRequest,
    ) -> AccessControlResult<User>;

    async fn activate_user(&self, user_id: &UserId) -> AccessControlResult<User>;

    async fn deactivate_user(&self, user_id: &UserId) -> AccessControlResult<User>;

    async fn lock_user(&self, user_id: &UserId) -> AccessControlResult<User>;

    async fn unlock_user(&self, user_id: &UserId) -> AccessControlResult<User>;

    async fn assign_role(&self, user_id: &UserId, role_id: &RoleId) -> AccessControlResult<User>;

    async fn remove_role(&self, user_id: &UserId, role_id: &RoleId) -> AccessControlResult<User>;

    async fn authenticate(&self, request: AuthenticateRequest) -> AccessControlResult<Session>;

    async fn validate_session(&self, session_id: &SessionId) -> AccessControlResult<User>;

    async fn logout(&self, session_id: &SessionId) -> AccessControlResult<()>;

    async fn change_password(&self, request: ChangePasswordRequest) -> AccessControlResult<()>;

    /// Resets the user's password to a freshly generated one-time
    /// temporary password and returns it.
    async fn reset_password(
        &self,
        user_id: &UserId,
        admin_user_id: &UserId,
    ) -> AccessControlResult<String>;

    async fn check_permission(
        &self,
        user_id: &UserId,
        permission: Permission,
    ) -> AccessControlResult<bool>;

    async fn check_any_permission(
        &self,
        user_id: &UserId,
        permissions: &HashSet<Permission>,
    ) -> AccessControlResult<bool>;

    async fn check_all_permissions(
        &self,
        user_id: &UserId,
        permissions: &HashSet<Permission>,
    ) -> AccessControlResult<bool>;

    async fn get_user_permissions(
        &self,
        user_id: &UserId,
    ) -> AccessControlResult<HashSet<Permission>>;

    async fn check_amount_limit(
        &self,
        user_id: &UserId,
        amount_minor: i64,
        kind: AmountLimitKind,
    ) -> AccessControlResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy_reports_every_missing_class() {
        let policy = PasswordPolicy::default();
        let violations = policy.violations("short");
        assert!(violations.iter().any(|v| v.contains("minimum length")));
        assert!(violations.iter().any(|v| v.contains("uppercase")));
        assert!(violations.iter().any(|v| v.contains("digit")));
        assert!(violations.iter().any(|v| v.contains("special")));
    }

    #[test]
    fn password_policy_accepts_compliant_password() {
        let policy = PasswordPolicy::default();
        assert!(policy.violations("Correct-Horse9").is_empty());
    }

    #[test]
    fn role_permission_queries() {
        let role = Role {
            id: "role-1".into(),
            name: "TELLER".into(),
            description: String::new(),
            permissions: [Permission::ViewAccount, Permission::CreateTransaction]
                .into_iter()
                .collect(),
            is_system_role: true,
            max_transaction_amount_minor: None,
            max_approval_amount_minor: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(role.has_permission(Permission::ViewAccount));
        assert!(!role.has_permission(Permission::ManageUsers));
        assert!(role.has_any_permission(&[Permission::ManageUsers, Permission::ViewAccount].into_iter().collect()));
        assert!(!role.has_all_permissions(&[Permission::ViewAccount, Permission::ManageUsers].into_iter().collect()));
    }
}
