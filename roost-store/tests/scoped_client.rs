use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use roost_core::{ErrorKind, StoreError};
use roost_store::{MemoryStore, RowStore, Scope, ScopedClient};

/// Test factory functions
fn store_with_two_tenants() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "tenants",
        vec![
            json!({ "id": "t1", "name": "Acme", "plan": "free", "status": "active" }),
            json!({ "id": "t2", "name": "Globex", "plan": "pro", "status": "active" }),
        ],
    );
    store.seed(
        "memberships",
        vec![
            json!({ "tenant_id": "t1", "user_id": "u1", "role": "owner" }),
            json!({ "tenant_id": "t2", "user_id": "u2", "role": "owner" }),
        ],
    );
    store.seed(
        "risks",
        vec![
            json!({ "id": "r1", "tenant_id": "t1", "title": "ladder audit" }),
            json!({ "id": "r2", "tenant_id": "t2", "title": "forklift recall" }),
        ],
    );
    store
}

fn scoped_for_u1(store: &Arc<MemoryStore>) -> ScopedClient {
    let client = ScopedClient::new(store.clone() as Arc<dyn RowStore>);
    client.configure(Scope::new("t1", "u1", "tok-u1"));
    client
}

/// A1. Insert attribution: absent fields are filled from the scope.
#[tokio::test]
async fn insert_fills_attribution_from_scope() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let created = client
        .insert("risks", json!({ "title": "crane inspection" }))
        .await
        .unwrap();

    assert_eq!(created["tenant_id"], "t1");
    assert_eq!(created["created_by"], "u1");
    assert!(created["id"].is_string());
}

/// A2. Insert attribution: explicit values are preserved, not overwritten.
#[tokio::test]
async fn insert_preserves_explicit_attribution() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let created = client
        .insert(
            "risks",
            json!({ "title": "imported", "tenant_id": "t1", "created_by": "importer" }),
        )
        .await
        .unwrap();

    assert_eq!(created["created_by"], "importer");
    assert_eq!(created["tenant_id"], "t1");
}

/// A3. Batch insert attributes every record.
#[tokio::test]
async fn insert_many_attributes_each_record() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let created = client
        .insert_many(
            "risks",
            vec![json!({ "title": "one" }), json!({ "title": "two" })],
        )
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    for row in created {
        assert_eq!(row["tenant_id"], "t1");
        assert_eq!(row["created_by"], "u1");
    }
}

/// B1. Operations before a scope is configured fail ScopeNotConfigured.
#[tokio::test]
async fn unscoped_operations_fail_loudly() {
    let store = store_with_two_tenants();
    let client = ScopedClient::new(store.clone() as Arc<dyn RowStore>);

    let err = client.insert("risks", json!({ "title": "x" })).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScopeNotConfigured);

    let err = client.select("risks", &["*"]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScopeNotConfigured);

    // Nothing reached the store.
    assert_eq!(store.op_count("insert"), 0);
    assert_eq!(store.op_count("select"), 0);
}

/// B2. clear_scope is idempotent and re-arms the guard.
#[tokio::test]
async fn clear_scope_rearms_the_guard() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    client.clear_scope();
    client.clear_scope();

    let err = client.select("risks", &["*"]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ScopeNotConfigured);
}

/// C1. Reads are scoped by the store's policies, not by the client.
#[tokio::test]
async fn select_returns_only_policy_visible_rows() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let rows = client.select("risks", &["*"]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "r1");
}

/// C2. Removing the store-side policy exposes cross-tenant rows through
/// the client, proving the client adds no duplicate filter of its own.
#[tokio::test]
async fn select_adds_no_client_side_tenant_filter() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    store.set_policies_enforced(false);

    let rows = client.select("risks", &["*"]).await.unwrap();
    let mut ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["r1", "r2"]);
}

/// C3. Column projection passes through.
#[tokio::test]
async fn select_projects_columns() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let rows = client.select("risks", &["title"]).await.unwrap();
    assert_eq!(rows[0], json!({ "title": "ladder audit" }));
}

/// D1. Updating a missing row and a policy-hidden row are the same error.
#[tokio::test]
async fn update_missing_and_denied_are_indistinguishable() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let missing = client
        .update("risks", "no-such-row", json!({ "title": "x" }))
        .await
        .unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFoundOrDenied);

    // r2 exists but belongs to the other tenant.
    let denied = client
        .update("risks", "r2", json!({ "title": "x" }))
        .await
        .unwrap_err();
    assert_eq!(denied.kind, ErrorKind::NotFoundOrDenied);
}

/// D2. A blank id never reaches the store.
#[tokio::test]
async fn update_with_blank_id_is_rejected_locally() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let err = client.update("risks", "  ", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFoundOrDenied);
    assert_eq!(store.op_count("update"), 0);

    let err = client.delete("risks", "").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFoundOrDenied);
    assert_eq!(store.op_count("delete"), 0);
}

/// D3. Visible rows update and delete normally.
#[tokio::test]
async fn update_and_delete_visible_rows() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let updated = client
        .update("risks", "r1", json!({ "title": "ladder audit q3" }))
        .await
        .unwrap();
    assert_eq!(updated["title"], "ladder audit q3");

    client.delete("risks", "r1").await.unwrap();
    assert!(client.select("risks", &["*"]).await.unwrap().is_empty());
}

/// E1. Raw store errors come back classified, never raw.
#[tokio::test]
async fn failures_are_classified() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    store.fail_next(
        "insert:risks",
        StoreError::new("permission denied for table risks").with_code("42501"),
    );
    let err = client.insert("risks", json!({ "title": "x" })).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert!(err.is_authorization_denial());
    assert!(err.source.is_some());

    store.fail_next("select:risks", StoreError::new("connection reset by peer"));
    let err = client.select("risks", &["*"]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransientStoreError);
    assert!(err.is_retryable());
}

/// E2. An expired credential classifies as InvalidCredential.
#[tokio::test]
async fn expired_credential_is_classified() {
    let store = store_with_two_tenants();
    let client = ScopedClient::new(store.clone() as Arc<dyn RowStore>);
    client.configure(Scope::new("t1", "u1", ""));

    let err = client.select("risks", &["*"]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidCredential);
}

/// F1. Observers see every classified error.
#[tokio::test]
async fn observers_receive_classified_errors() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_observer = seen.clone();
    client.on_error(Arc::new(move |err| {
        seen_in_observer.lock().push(err.kind);
        Ok(())
    }));

    store.fail_next(
        "insert:risks",
        StoreError::new("Row level security policy violation"),
    );
    let _ = client.insert("risks", json!({ "title": "x" })).await;
    let _ = client.update("risks", "", json!({})).await;

    let kinds = seen.lock().clone();
    assert_eq!(
        kinds,
        vec![ErrorKind::PermissionDenied, ErrorKind::NotFoundOrDenied]
    );
}

/// F2. A failing observer never affects the operation's result, and
/// removal stops delivery.
#[tokio::test]
async fn observer_failures_are_isolated() {
    let store = store_with_two_tenants();
    let client = scoped_for_u1(&store);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_observer = calls.clone();
    let id = client.on_error(Arc::new(move |_| {
        calls_in_observer.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("observer exploded"))
    }));

    let err = client.update("risks", "", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFoundOrDenied);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(client.off(id));
    assert!(!client.off(id));

    let _ = client.update("risks", "", json!({})).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// G1. RPC passes through and classifies failures.
#[tokio::test]
async fn rpc_roundtrip_and_classification() {
    let store = store_with_two_tenants();
    store.register_rpc("risk_count", |_auth, params| {
        Ok(json!({ "count": 2, "echo": params }))
    });
    let client = scoped_for_u1(&store);

    let out = client.rpc("risk_count", json!({ "window": "30d" })).await.unwrap();
    assert_eq!(out["count"], 2);

    let err = client.rpc("no_such_fn", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownError);
}
