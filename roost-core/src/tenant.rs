//! Core multi-tenant types for Roost.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a tenant (organization).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    /// Generate a new unique tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a user. Issued by the external session provider;
/// Roost never mints or retires these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id carries no value at all.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Per-tenant role of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Engineer,
    Viewer,
}

impl Role {
    /// Role name as stored in membership rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Engineer => "engineer",
            Role::Viewer => "viewer",
        }
    }

    /// Roles allowed to administer tenant membership.
    pub fn can_manage_members(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    /// Parse a stored role name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "engineer" => Some(Role::Engineer),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription plan of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantPlan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Free => "free",
            TenantPlan::Pro => "pro",
            TenantPlan::Enterprise => "enterprise",
        }
    }
}

/// Lifecycle status of a tenant. Roost never deletes tenants; suspension
/// is the strongest transition this core participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
        }
    }
}

/// A tenant (organization). Created exactly once by the onboarding flow,
/// mutated only through explicit update operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub plan: TenantPlan,
    pub status: TenantStatus,
}

impl Tenant {
    /// A freshly provisioned tenant on the default plan.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            plan: TenantPlan::default(),
            status: TenantStatus::default(),
        }
    }
}

/// Membership of a user in a tenant. At most one row exists per
/// (tenant_id, user_id) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
}

/// A membership row joined with its tenant's display fields - the shape
/// the membership listing returns and the selection screen renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipView {
    pub tenant_id: TenantId,
    pub role: Role,
    pub tenant_name: String,
    pub tenant_plan: TenantPlan,
    pub tenant_status: TenantStatus,
}

/// The active (user, tenant, role) snapshot every scoped data operation
/// reads. Derived during resolution, cached process-wide, persisted under
/// a single durable key as camelCase JSON.
///
/// `user_id` always equals the authenticated identity's id. It is sourced
/// from the live session and nowhere else; see
/// [`TenantContext::from_membership`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub user_id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub tenant_id: TenantId,
    pub tenant_name: String,
    pub tenant_plan: TenantPlan,
    pub tenant_status: TenantStatus,
}

impl TenantContext {
    /// Build the context snapshot for an identity and one of its
    /// membership rows. This is the only constructor the resolver uses:
    /// the user fields come from the live identity, never from stored
    /// state.
    pub fn from_membership(
        user_id: UserId,
        email: impl Into<String>,
        full_name: Option<String>,
        membership: &MembershipView,
    ) -> Self {
        Self {
            user_id,
            email: email.into(),
            full_name,
            role: membership.role,
            tenant_id: membership.tenant_id.clone(),
            tenant_name: membership.tenant_name.clone(),
            tenant_plan: membership.tenant_plan,
            tenant_status: membership.tenant_status,
        }
    }
}
