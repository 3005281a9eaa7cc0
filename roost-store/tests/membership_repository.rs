use std::sync::Arc;

use serde_json::json;

use roost_core::{ErrorKind, Role, StoreError, TenantPlan, TenantStatus, UserId};
use roost_store::{MembershipRepository, MemoryStore, RowStore, StoreAuth, StoreMembershipRepository};

/// Test factory functions
fn repo_over(store: &Arc<MemoryStore>) -> StoreMembershipRepository {
    StoreMembershipRepository::new(store.clone() as Arc<dyn RowStore>)
}

fn auth_for(user: &str) -> StoreAuth {
    StoreAuth::new(user, format!("tok-{user}"))
}

fn seed_membership(store: &MemoryStore, tenant: &str, name: &str, user: &str, role: &str) {
    store.seed(
        "tenants",
        vec![json!({ "id": tenant, "name": name, "plan": "pro", "status": "active" })],
    );
    store.seed(
        "memberships",
        vec![json!({ "tenant_id": tenant, "user_id": user, "role": role })],
    );
}

/// A1. Listing joins membership rows with tenant display fields.
#[tokio::test]
async fn list_memberships_joins_tenant_fields() {
    let store = Arc::new(MemoryStore::new());
    seed_membership(&store, "t1", "Acme", "u1", "admin");
    let repo = repo_over(&store);

    let views = repo
        .list_memberships(&auth_for("u1"), &UserId::from("u1"))
        .await
        .unwrap();

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].tenant_id.as_str(), "t1");
    assert_eq!(views[0].role, Role::Admin);
    assert_eq!(views[0].tenant_name, "Acme");
    assert_eq!(views[0].tenant_plan, TenantPlan::Pro);
    assert_eq!(views[0].tenant_status, TenantStatus::Active);
}

/// A2. Listing is per-user: other users' rows do not leak in.
#[tokio::test]
async fn list_memberships_is_scoped_to_the_user() {
    let store = Arc::new(MemoryStore::new());
    seed_membership(&store, "t1", "Acme", "u1", "owner");
    seed_membership(&store, "t2", "Globex", "u2", "owner");
    let repo = repo_over(&store);

    let views = repo
        .list_memberships(&auth_for("u1"), &UserId::from("u1"))
        .await
        .unwrap();

    assert_eq!(views.len(), 1);
    assert_eq!(views[0].tenant_name, "Acme");
}

/// B1. Provisioning creates the tenant and the owning membership.
#[tokio::test]
async fn provision_creates_tenant_and_owner_membership() {
    let store = Arc::new(MemoryStore::new());
    let repo = repo_over(&store);

    let (tenant, membership) = repo
        .provision_tenant(&auth_for("u1"), "Acme", &UserId::from("u1"), Role::Owner)
        .await
        .unwrap();

    assert_eq!(tenant.name, "Acme");
    assert_eq!(membership.role, Role::Owner);
    assert_eq!(membership.tenant_id, tenant.id);
    assert_eq!(store.rows("tenants").len(), 1);
    assert_eq!(store.rows("memberships").len(), 1);
}

/// B2. A membership failure rolls the tenant back - no orphan remains.
#[tokio::test]
async fn provision_rolls_back_tenant_on_membership_failure() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next("insert:memberships", StoreError::new("statement timeout"));
    let repo = repo_over(&store);

    let err = repo
        .provision_tenant(&auth_for("u1"), "Acme", &UserId::from("u1"), Role::Owner)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::TransientStoreError);
    assert!(store.rows("tenants").is_empty());
    assert!(store.rows("memberships").is_empty());
}

/// B3. The original error survives even when the rollback itself fails.
#[tokio::test]
async fn provision_rollback_failure_does_not_mask_original_error() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next(
        "insert:memberships",
        StoreError::new("permission denied for table memberships").with_code("42501"),
    );
    store.fail_next("delete:tenants", StoreError::new("connection reset by peer"));
    let repo = repo_over(&store);

    let err = repo
        .provision_tenant(&auth_for("u1"), "Acme", &UserId::from("u1"), Role::Owner)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::PermissionDenied);
}

/// B4. The same (tenant, user) pair cannot hold two memberships.
#[tokio::test]
async fn duplicate_membership_is_rejected_by_the_store() {
    let store = Arc::new(MemoryStore::new());
    seed_membership(&store, "t1", "Acme", "u1", "owner");
    let repo = repo_over(&store);

    let err = repo
        .create_membership(
            &auth_for("u1"),
            &"t1".into(),
            &UserId::from("u1"),
            Role::Viewer,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnknownError);
    assert_eq!(store.rows("memberships").len(), 1);
}

/// C1. Switching the active tenant patches the profile row in place.
#[tokio::test]
async fn set_active_tenant_updates_existing_profile() {
    let store = Arc::new(MemoryStore::new());
    seed_membership(&store, "t1", "Acme", "u1", "owner");
    store.seed(
        "profiles",
        vec![json!({ "id": "u1", "active_tenant_id": "t0" })],
    );
    let repo = repo_over(&store);

    repo.set_active_tenant(&auth_for("u1"), &UserId::from("u1"), &"t1".into())
        .await
        .unwrap();

    let profiles = store.rows("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["active_tenant_id"], "t1");
    assert_eq!(store.op_count("update:profiles"), 1);
    assert_eq!(store.op_count("insert:profiles"), 0);
}

/// C2. The first switch creates the profile row.
#[tokio::test]
async fn set_active_tenant_creates_missing_profile() {
    let store = Arc::new(MemoryStore::new());
    seed_membership(&store, "t1", "Acme", "u1", "owner");
    let repo = repo_over(&store);

    repo.set_active_tenant(&auth_for("u1"), &UserId::from("u1"), &"t1".into())
        .await
        .unwrap();

    let profiles = store.rows("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["active_tenant_id"], "t1");
}

/// D1. A query-level denial classifies as PermissionDenied, never as an
/// empty listing.
#[tokio::test]
async fn listing_denial_is_not_zero_memberships() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next(
        "select:memberships",
        StoreError::new("permission denied for table memberships").with_code("42501"),
    );
    let repo = repo_over(&store);

    let err = repo
        .list_memberships(&auth_for("u1"), &UserId::from("u1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert!(err.is_authorization_denial());
}
