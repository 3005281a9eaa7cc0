// Membership repository.

use std::sync::Arc;

use async_trait::async_trait;
use roost_core::{
    classify, CoreError, CoreResult, Membership, MembershipView, Role, Tenant, TenantId, UserId,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::store::{RowStore, StoreAuth};

const TENANTS: &str = "tenants";
const MEMBERSHIPS: &str = "memberships";
const PROFILES: &str = "profiles";

/// Read/write access to (tenant, user, role) triples and tenant
/// metadata. Every method runs under the caller's store identity; the
/// store's row policies decide what is actually visible or writable.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// All memberships of a user, joined with tenant display fields.
    /// A point-in-time snapshot; callers classify it once and act.
    async fn list_memberships(
        &self,
        auth: &StoreAuth,
        user_id: &UserId,
    ) -> CoreResult<Vec<MembershipView>>;

    /// Create a tenant row.
    async fn create_tenant(&self, auth: &StoreAuth, name: &str) -> CoreResult<Tenant>;

    /// Create a membership row.
    async fn create_membership(
        &self,
        auth: &StoreAuth,
        tenant_id: &TenantId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<Membership>;

    /// Record the user's active tenant on their profile.
    async fn set_active_tenant(
        &self,
        auth: &StoreAuth,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> CoreResult<()>;

    /// Tenant plus owning membership as one logical operation. A
    /// membership failure rolls the tenant back - onboarding never
    /// leaves an orphaned tenant behind.
    async fn provision_tenant(
        &self,
        auth: &StoreAuth,
        name: &str,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<(Tenant, Membership)>;
}

/// [`MembershipRepository`] over a [`RowStore`].
pub struct StoreMembershipRepository {
    store: Arc<dyn RowStore>,
}

impl StoreMembershipRepository {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    async fn tenant_by_id(&self, auth: &StoreAuth, id: &str) -> CoreResult<Option<Tenant>> {
        let rows = self
            .store
            .select(auth, TENANTS, &["*"], Some(("id", &json!(id))))
            .await
            .map_err(|raw| classify(&raw))?;
        Ok(rows.into_iter().next().map(parse_tenant).transpose()?)
    }
}

#[async_trait]
impl MembershipRepository for StoreMembershipRepository {
    async fn list_memberships(
        &self,
        auth: &StoreAuth,
        user_id: &UserId,
    ) -> CoreResult<Vec<MembershipView>> {
        let rows = self
            .store
            .select(
                auth,
                MEMBERSHIPS,
                &["tenant_id", "user_id", "role"],
                Some(("user_id", &json!(user_id.as_str()))),
            )
            .await
            .map_err(|raw| classify(&raw))?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let membership = parse_membership(row)?;
            let Some(tenant) = self.tenant_by_id(auth, membership.tenant_id.as_str()).await?
            else {
                // Membership without a visible tenant: skip rather than
                // fail the whole listing.
                warn!(tenant_id = %membership.tenant_id, "membership references an invisible tenant");
                continue;
            };
            views.push(MembershipView {
                tenant_id: membership.tenant_id,
                role: membership.role,
                tenant_name: tenant.name,
                tenant_plan: tenant.plan,
                tenant_status: tenant.status,
            });
        }
        Ok(views)
    }

    async fn create_tenant(&self, auth: &StoreAuth, name: &str) -> CoreResult<Tenant> {
        let tenant = Tenant::new(name);
        let row = json!({
            "id": tenant.id.as_str(),
            "name": tenant.name,
            "plan": tenant.plan.as_str(),
            "status": tenant.status.as_str(),
            "created_by": auth.user_id.as_str(),
        });
        self.store
            .insert(auth, TENANTS, vec![row])
            .await
            .map_err(|raw| classify(&raw))?;
        Ok(tenant)
    }

    async fn create_membership(
        &self,
        auth: &StoreAuth,
        tenant_id: &TenantId,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<Membership> {
        let row = json!({
            "tenant_id": tenant_id.as_str(),
            "user_id": user_id.as_str(),
            "role": role.as_str(),
        });
        self.store
            .insert(auth, MEMBERSHIPS, vec![row])
            .await
            .map_err(|raw| classify(&raw))?;
        Ok(Membership {
            tenant_id: tenant_id.clone(),
            user_id: user_id.clone(),
            role,
        })
    }

    async fn set_active_tenant(
        &self,
        auth: &StoreAuth,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> CoreResult<()> {
        let patch = json!({ "active_tenant_id": tenant_id.as_str() });
        let updated = self
            .store
            .update(auth, PROFILES, user_id.as_str(), patch)
            .await
            .map_err(|raw| classify(&raw))?;

        if updated.is_none() {
            // First switch for this user: the profile row does not exist
            // yet, so create it.
            let row = json!({
                "id": user_id.as_str(),
                "active_tenant_id": tenant_id.as_str(),
            });
            self.store
                .insert(auth, PROFILES, vec![row])
                .await
                .map_err(|raw| classify(&raw))?;
        }
        Ok(())
    }

    async fn provision_tenant(
        &self,
        auth: &StoreAuth,
        name: &str,
        user_id: &UserId,
        role: Role,
    ) -> CoreResult<(Tenant, Membership)> {
        let tenant = self.create_tenant(auth, name).await?;

        match self
            .create_membership(auth, &tenant.id, user_id, role)
            .await
        {
            Ok(membership) => Ok((tenant, membership)),
            Err(err) => {
                // Roll the tenant back so the failed onboarding leaves
                // nothing behind. A failed rollback is logged but must
                // not mask the original failure.
                if let Err(raw) = self
                    .store
                    .delete(auth, TENANTS, tenant.id.as_str())
                    .await
                {
                    error!(
                        tenant_id = %tenant.id,
                        error = %raw,
                        "tenant rollback failed after membership creation error"
                    );
                }
                Err(err)
            }
        }
    }
}

fn parse_tenant(row: Value) -> CoreResult<Tenant> {
    serde_json::from_value(row)
        .map_err(|e| CoreError::unknown(format!("malformed tenant row: {e}")))
}

fn parse_membership(row: Value) -> CoreResult<Membership> {
    serde_json::from_value(row)
        .map_err(|e| CoreError::unknown(format!("malformed membership row: {e}")))
}
