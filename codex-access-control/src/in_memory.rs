use std::collections::HashMap;
use std::collections::HashSet;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::AccessControlError;
use crate::AccessControlResult;
use crate::AccessControlService;
use crate::AmountLimitKind;
use crate::AuthenticateRequest;
use crate::ChangePasswordRequest;
use crate::CreateRoleRequest;
use crate::CreateUserRequest;
use crate::Permission;
use crate::PasswordPolicy;
use crate::Role;
use crate::RoleId;
use crate::Session;
use crate::SessionId;
use crate::UpdateRoleRequest;
use crate::UpdateUserRequest;
use crate::User;
use crate::UserId;
use crate::UserStatus;
use crate::hashing;

const SESSION_DURATION_HOURS: i64 = 8;

struct AccessControlState {
    roles: HashMap<RoleId, Role>,
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
}

pub struct InMemoryAccessControlService {
    state: RwLock<AccessControlState>,
    password_policy: PasswordPolicy,
}

impl InMemoryAccessControlService {
    #[must_use]
    pub fn new() -> Self {
        Self::with_password_policy(PasswordPolicy::default())
    }

    #[must_use]
    pub fn with_password_policy(password_policy: PasswordPolicy) -> Self {
        let mut roles = HashMap::new();
        for role in system_roles() {
            roles.insert(role.id.clone(), role);
        }

        Self {
            state: RwLock::new(AccessControlState {
                roles,
                users: HashMap::new(),
                sessions: HashMap::new(),
            }),
            password_policy,
        }
    }

    fn require_role<'a>(
        role_id: &RoleId,
        state: &'a AccessControlState,
    ) -> AccessControlResult<&'a Role> {
        state
            .roles
            .get(role_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("role {role_id}")))
    }

    fn require_user<'a>(
        user_id: &UserId,
        state: &'a AccessControlState,
    ) -> AccessControlResult<&'a User> {
        state
            .users
            .get(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))
    }

    fn ensure_unique_role_name(state: &AccessControlState, name: &str) -> AccessControlResult<()> {
        if state.roles.values().any(|role| role.name == name) {
            return Err(AccessControlError::Conflict(format!(
                "role {name} already exists"
            )));
        }
        Ok(())
    }

    fn ensure_unique_username(
        state: &AccessControlState,
        username: &str,
    ) -> AccessControlResult<()> {
        if state.users.values().any(|user| user.username == username) {
            return Err(AccessControlError::Conflict(format!(
                "user {username} already exists"
            )));
        }
        Ok(())
    }

    fn set_password(user: &mut User, password: &str) {
        let salt = user
            .password_salt
            .clone()
            .unwrap_or_else(hashing::generate_salt);
        user.password_hash = Some(hashing::hash_password(password, &salt));
        user.password_salt = Some(salt);
    }

    /// Verifies `password` against `user`'s stored hash, trying the
    /// current KDF first and falling back to the legacy verifier. Returns
    /// `Some(true)` if the legacy verifier matched and the hash should be
    /// upgraded in place by the caller.
    fn verify_password(user: &User, password: &str) -> (bool, bool) {
        let (Some(hash), Some(salt)) = (&user.password_hash, &user.password_salt) else {
            return (false, false);
        };

        if hashing::hash_password(password, salt) == *hash {
            return (true, false);
        }
        if hashing::hash_password_legacy(password, salt) == *hash {
            return (true, true);
        }
        (false, false)
    }

    fn invalidate_user_sessions(state: &mut AccessControlState, user_id: &UserId) {
        for session in state.sessions.values_mut() {
            if session.user_id == *user_id {
                session.is_active = false;
            }
        }
    }

    fn user_permissions(state: &AccessControlState, user: &User) -> HashSet<Permission> {
        let mut permissions = HashSet::new();
        for role_id in &user.role_ids {
            if let Some(role) = state.roles.get(role_id) {
                permissions.extend(role.permissions.iter().copied());
            }
        }
        permissions
    }
}

impl Default for InMemoryAccessControlService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AccessControlService for InMemoryAccessControlService {
    async fn create_role(&self, request: CreateRoleRequest) -> AccessControlResult<Role> {
        if request.name.trim().is_empty() {
            return Err(AccessControlError::Validation(
                "role name cannot be empty".into(),
            ));
        }

        let mut guard = self.state.write().await;
        Self::ensure_unique_role_name(&guard, &request.name)?;

        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            permissions: request.permissions,
            is_system_role: false,
            max_transaction_amount_minor: request.max_transaction_amount_minor,
            max_approval_amount_minor: request.max_approval_amount_minor,
            created_at: now,
            updated_at: now,
        };
        guard.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn get_role(&self, role_id: &RoleId) -> AccessControlResult<Role> {
        let guard = self.state.read().await;
        Self::require_role(role_id, &guard).cloned()
    }

    async fn list_roles(&self) -> AccessControlResult<Vec<Role>> {
        let guard = self.state.read().await;
        let mut roles: Vec<_> = guard.roles.values().cloned().collect();
        roles.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(roles)
    }

    async fn update_role(
        &self,
        role_id: &RoleId,
        request: UpdateRoleRequest,
    ) -> AccessControlResult<Role> {
        let mut guard = self.state.write().await;
        let role = guard
            .roles
            .get_mut(role_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("role {role_id}")))?;

        if role.is_system_role {
            return Err(AccessControlError::Rejected(
                "system roles cannot be modified".into(),
            ));
        }

        if let Some(description) = request.description {
            role.description = description;
        }
        if let Some(permissions) = request.permissions {
            role.permissions = permissions;
        }
        if request.max_transaction_amount_minor.is_some() {
            role.max_transaction_amount_minor = request.max_transaction_amount_minor;
        }
        if request.max_approval_amount_minor.is_some() {
            role.max_approval_amount_minor = request.max_approval_amount_minor;
        }
        role.updated_at = Utc::now();

        Ok(role.clone())
    }

    async fn delete_role(&self, role_id: &RoleId) -> AccessControlResult<()> {
        let mut guard = self.state.write().await;
        let role = Self::require_role(role_id, &guard)?;
        if role.is_system_role {
            return Err(AccessControlError::Rejected(
                "system roles cannot be deleted".into(),
            ));
        }
        if guard
            .users
            .values()
            .any(|user| user.has_role(role_id))
        {
            return Err(AccessControlError::Rejected(format!(
                "role {role_id} is still assigned to a user"
            )));
        }
        guard.roles.remove(role_id);
        Ok(())
    }

    async fn create_user(&self, request: CreateUserRequest) -> AccessControlResult<User> {
        if request.username.trim().is_empty() {
            return Err(AccessControlError::Validation(
                "username cannot be empty".into(),
            ));
        }

        let mut guard = self.state.write().await;
        Self::ensure_unique_username(&guard, &request.username)?;
        for role_id in &request.role_ids {
            Self::require_role(role_id, &guard)?;
        }

        let now = Utc::now();
        let mut user = User {
            id: Uuid::new_v4().to_string(),
            username: request.username,
            email: request.email,
            full_name: request.full_name,
            role_ids: request.role_ids,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            last_login: None,
            password_changed_at: None,
            created_by: request.created_by,
            password_hash: None,
            password_salt: None,
            password_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        if let Some(password) = request.password.as_deref() {
            Self::set_password(&mut user, password);
            user.password_changed_at = Some(now);
        }

        guard.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: &UserId) -> AccessControlResult<User> {
        let guard = self.state.read().await;
        Self::require_user(user_id, &guard).cloned()
    }

    async fn get_user_by_username(&self, username: &str) -> AccessControlResult<User> {
        let guard = self.state.read().await;
        guard
            .users
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or_else(|| AccessControlError::NotFound(format!("user {username}")))
    }

    async fn list_users(&self) -> AccessControlResult<Vec<User>> {
        let guard = self.state.read().await;
        let mut users: Vec<_> = guard.users.values().cloned().collect();
        users.sort_by(|left, right| left.username.cmp(&right.username));
        Ok(users)
    }

    async fn update_user(
        &self,
        user_id: &UserId,
        request: UpdateUserRequest,
    ) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;

        if let Some(email) = request.email {
            user.email = email;
        }
        if let Some(full_name) = request.full_name {
            user.full_name = full_name;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn activate_user(&self, user_id: &UserId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.status = UserStatus::Active;
        user.failed_login_attempts = 0;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn deactivate_user(&self, user_id: &UserId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.status = UserStatus::Inactive;
        user.updated_at = Utc::now();
        Self::invalidate_user_sessions(&mut guard, user_id);
        Self::require_user(user_id, &guard).map(Clone::clone)
    }

    async fn lock_user(&self, user_id: &UserId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.status = UserStatus::Locked;
        user.updated_at = Utc::now();
        Self::invalidate_user_sessions(&mut guard, user_id);
        Self::require_user(user_id, &guard).map(Clone::clone)
    }

    async fn unlock_user(&self, user_id: &UserId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.status = UserStatus::Active;
        user.failed_login_attempts = 0;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn assign_role(&self, user_id: &UserId, role_id: &RoleId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        Self::require_role(role_id, &guard)?;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        if !user.has_role(role_id) {
            user.role_ids.push(role_id.clone());
            user.updated_at = Utc::now();
        }
        Ok(user.clone())
    }

    async fn remove_role(&self, user_id: &UserId, role_id: &RoleId) -> AccessControlResult<User> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.role_ids.retain(|id| id != role_id);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn authenticate(&self, request: AuthenticateRequest) -> AccessControlResult<Session> {
        let mut guard = self.state.write().await;

        let (user_id, matched, needs_upgrade) = {
            let user = guard
                .users
                .values()
                .find(|user| user.username == request.username)
                .ok_or_else(|| AccessControlError::Auth("invalid credentials".into()))?;

            if !user.status.is_available() {
                return Err(AccessControlError::Auth("account is not available".into()));
            }

            let (matched, needs_upgrade) = Self::verify_password(user, &request.password);
            (user.id.clone(), matched, needs_upgrade)
        };

        if !matched {
            let user = guard
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
            user.failed_login_attempts += 1;
            if user.failed_login_attempts >= self.password_policy.max_failed_attempts {
                user.status = UserStatus::Locked;
            }
            user.updated_at = Utc::now();
            return Err(AccessControlError::Auth("invalid credentials".into()));
        }

        if needs_upgrade {
            let user = guard
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
            Self::set_password(user, &request.password);
        }

        let user = guard
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        user.failed_login_attempts = 0;
        let now = Utc::now();
        user.last_login = Some(now);
        user.updated_at = now;

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_DURATION_HOURS),
            is_active: true,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
        };
        guard.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn validate_session(&self, session_id: &SessionId) -> AccessControlResult<User> {
        let guard = self.state.read().await;
        let session = guard
            .sessions
            .get(session_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("session {session_id}")))?;

        if !session.is_valid(Utc::now()) {
            return Err(AccessControlError::Auth("session expired".into()));
        }

        let user = Self::require_user(&session.user_id, &guard)?;
        if !user.status.is_available() {
            return Err(AccessControlError::Auth("account is not available".into()));
        }
        Ok(user.clone())
    }

    async fn logout(&self, session_id: &SessionId) -> AccessControlResult<()> {
        let mut guard = self.state.write().await;
        let session = guard
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("session {session_id}")))?;
        session.is_active = false;
        Ok(())
    }

    async fn change_password(&self, request: ChangePasswordRequest) -> AccessControlResult<()> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get(&request.user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {}", request.user_id)))?
            .clone();

        let (matched, _) = Self::verify_password(&user, &request.old_password);
        if !matched {
            return Err(AccessControlError::Auth("invalid credentials".into()));
        }

        let violations = self.password_policy.violations(&request.new_password);
        if !violations.is_empty() {
            return Err(AccessControlError::Policy(violations));
        }

        let salt = user
            .password_salt
            .clone()
            .unwrap_or_else(hashing::generate_salt);
        let new_hash = hashing::hash_password(&request.new_password, &salt);
        if user.password_hash.as_deref() == Some(new_hash.as_str())
            || user.password_history.contains(&new_hash)
        {
            return Err(AccessControlError::Policy(vec![
                "cannot reuse recent passwords".into(),
            ]));
        }

        let user = guard
            .users
            .get_mut(&request.user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {}", request.user_id)))?;
        if let Some(previous) = user.password_hash.clone()
            && !user.password_history.contains(&previous)
        {
            user.password_history.push(previous);
        }
        let history_count = self.password_policy.history_count;
        if user.password_history.len() > history_count {
            let overflow = user.password_history.len() - history_count;
            user.password_history.drain(0..overflow);
        }

        Self::set_password(user, &request.new_password);
        let now = Utc::now();
        user.password_changed_at = Some(now);
        user.updated_at = now;
        Ok(())
    }

    async fn reset_password(
        &self,
        user_id: &UserId,
        _admin_user_id: &UserId,
    ) -> AccessControlResult<String> {
        let mut guard = self.state.write().await;
        let user = guard
            .users
            .get_mut(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;

        let temp_password = format!("tmp-{}", Uuid::new_v4().simple());
        Self::set_password(user, &temp_password);
        let now = Utc::now();
        user.password_changed_at = Some(now);
        user.updated_at = now;
        Ok(temp_password)
    }

    async fn check_permission(
        &self,
        user_id: &UserId,
        permission: Permission,
    ) -> AccessControlResult<bool> {
        let guard = self.state.read().await;
        let Some(user) = guard.users.get(user_id) else {
            return Ok(false);
        };
        if !user.status.is_available() {
            return Ok(false);
        }
        Ok(Self::user_permissions(&guard, user).contains(&permission))
    }

    async fn check_any_permission(
        &self,
        user_id: &UserId,
        permissions: &HashSet<Permission>,
    ) -> AccessControlResult<bool> {
        let guard = self.state.read().await;
        let Some(user) = guard.users.get(user_id) else {
            return Ok(false);
        };
        if !user.status.is_available() {
            return Ok(false);
        }
        let held = Self::user_permissions(&guard, user);
        Ok(!held.is_disjoint(permissions))
    }

    async fn check_all_permissions(
        &self,
        user_id: &UserId,
        permissions: &HashSet<Permission>,
    ) -> AccessControlResult<bool> {
        let guard = self.state.read().await;
        let Some(user) = guard.users.get(user_id) else {
            return Ok(false);
        };
        if !user.status.is_available() {
            return Ok(false);
        }
        let held = Self::user_permissions(&guard, user);
        Ok(permissions.is_subset(&held))
    }

    async fn get_user_permissions(
        &self,
        user_id: &UserId,
    ) -> AccessControlResult<HashSet<Permission>> {
        let guard = self.state.read().await;
        let Some(user) = guard.users.get(user_id) else {
            return Ok(HashSet::new());
        };
        if !user.status.is_available() {
            return Ok(HashSet::new());
        }
        Ok(Self::user_permissions(&guard, user))
    }

    async fn check_amount_limit(
        &self,
        user_id: &UserId,
        amount_minor: i64,
        kind: AmountLimitKind,
    ) -> AccessControlResult<bool> {
        let guard = self.state.read().await;
        let user = guard
            .users
            .get(user_id)
            .ok_or_else(|| AccessControlError::NotFound(format!("user {user_id}")))?;
        if !user.status.is_available() {
            return Ok(false);
        }

        for role_id in &user.role_ids {
            let Some(role) = guard.roles.get(role_id) else {
                continue;
            };
            let limit = match kind {
                AmountLimitKind::Transaction => role.max_transaction_amount_minor,
                AmountLimitKind::Approval => role.max_approval_amount_minor,
            };
            if let Some(limit) = limit
                && amount_minor > limit
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn system_role(name: &str, description: &str, permissions: HashSet<Permission>) -> Role {
    let now = Utc::now();
    Role {
        id: Uuid::new_v4().to_string(),
        name: name.into(),
        description: description.into(),
        permissions,
        is_system_role: true,
        max_transaction_amount_minor: None,
        max_approval_amount_minor: None,
        created_at: now,
        updated_at: now,
    }
}

/// The eight built-in roles, exact permission sets from the original
/// RBAC module's `_create_system_roles`.
fn system_roles() -> Vec<Role> {
    use Permission::*;

    vec![
        system_role(
            "ADMIN",
            "System administrator with full access",
            Permission::all(),
        ),
        system_role(
            "BRANCH_MANAGER",
            "Branch manager with operational oversight",
            [
                ViewAccount,
                ModifyAccount,
                CreateAccount,
                ViewCustomer,
                ModifyCustomer,
                CreateCustomer,
                ViewTransaction,
                CreateTransaction,
                ApproveTransaction,
                ViewLoan,
                CreateLoan,
                ApproveLoan,
                ViewReports,
                CreateReports,
                StartWorkflow,
                ApproveWorkflowStep,
            ]
            .into_iter()
            .collect(),
        ),
        system_role(
            "LOAN_OFFICER",
            "Loan officer for loan origination",
            [
                ViewCustomer,
                CreateCustomer,
                ModifyCustomer,
                ViewLoan,
                CreateLoan,
                ViewAccount,
                CreateAccount,
                StartWorkflow,
            ]
            .into_iter()
            .collect(),
        ),
        system_role(
            "TELLER",
            "Teller for basic transactions",
            [ViewAccount, ViewCustomer, CreateTransaction, ViewTransaction]
                .into_iter()
                .collect(),
        ),
        system_role(
            "AUDITOR",
            "Auditor with read-only access",
            [
                ViewAccount,
                ViewCustomer,
                ViewTransaction,
                ViewLoan,
                ViewCreditLine,
                ViewReports,
                ViewAuditLog,
            ]
            .into_iter()
            .collect(),
        ),
        system_role(
            "COMPLIANCE_OFFICER",
            "Compliance officer for regulatory oversight",
            [
                ViewAccount,
                ViewCustomer,
                ViewTransaction,
                ViewReports,
                ViewAuditLog,
                ViewCollections,
                ManageCollections,
            ]
            .into_iter()
            .collect(),
        ),
        system_role(
            "COLLECTOR",
            "Collections specialist",
            [ViewCollections, ManageCollections, ViewLoan, ViewCustomer]
                .into_iter()
                .collect(),
        ),
        system_role(
            "READ_ONLY",
            "Read-only access for reporting",
            [
                ViewAccount,
                ViewCustomer,
                ViewTransaction,
                ViewLoan,
                ViewCreditLine,
                ViewReports,
            ]
            .into_iter()
            .collect(),
        ),
    ]
}
