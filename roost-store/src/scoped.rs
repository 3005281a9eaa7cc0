// The tenant-scoped data client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roost_core::{classify, CoreError, CoreResult, TenantId, UserId};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::store::{RowStore, StoreAuth};

/// The active scope every operation runs under: which tenant writes are
/// attributed to, and which identity the store evaluates policies
/// against.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub access_token: String,
}

impl Scope {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        user_id: impl Into<UserId>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }

    fn store_auth(&self) -> StoreAuth {
        StoreAuth::new(self.user_id.clone(), self.access_token.clone())
    }
}

/// Handle for removing a registered error observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

static OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

fn next_observer_id() -> ObserverId {
    ObserverId(OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Observer signature. A failing observer is logged and ignored; it can
/// never affect the operation that triggered it.
pub type ErrorObserver = Arc<dyn Fn(&CoreError) -> anyhow::Result<()> + Send + Sync>;

struct ObserverEntry {
    id: ObserverId,
    observer: ErrorObserver,
}

/// The sole sanctioned gateway for tenant-owned records.
///
/// The client does not authorize anything itself - row policies in the
/// store do. What it owns:
///
/// - **Write attribution**: inserts get `tenant_id` and `created_by`
///   from the active scope unless the caller supplied them.
/// - **Read non-filtering**: reads never add a tenant filter. Filtering
///   both here and in the store would let a client-side filter hide a
///   broken policy, so scoping is the store's job alone.
/// - **Classification**: every failure goes through the classifier;
///   raw store errors never reach feature code.
pub struct ScopedClient {
    store: Arc<dyn RowStore>,
    scope: RwLock<Option<Scope>>,
    observers: RwLock<Vec<ObserverEntry>>,
}

impl ScopedClient {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self {
            store,
            scope: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Set the active scope. Effective for the very next operation on
    /// any thread - callers that set a context before reading are
    /// guaranteed to read under it.
    pub fn configure(&self, scope: Scope) {
        debug!(tenant_id = %scope.tenant_id, user_id = %scope.user_id, "data scope configured");
        *self.scope.write() = Some(scope);
    }

    /// Drop the active scope. Idempotent.
    pub fn clear_scope(&self) {
        *self.scope.write() = None;
    }

    /// The current scope, if configured.
    pub fn scope(&self) -> Option<Scope> {
        self.scope.read().clone()
    }

    /// Register an error observer for operational diagnostics.
    pub fn on_error(&self, observer: ErrorObserver) -> ObserverId {
        let id = next_observer_id();
        self.observers.write().push(ObserverEntry { id, observer });
        id
    }

    /// Remove a registered observer. Returns whether it existed.
    pub fn off(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|e| e.id != id);
        before != observers.len()
    }

    /// Insert one record with attribution.
    pub async fn insert(&self, table: &str, record: Value) -> CoreResult<Value> {
        let mut rows = self.insert_many(table, vec![record]).await?;
        rows.pop()
            .ok_or_else(|| CoreError::unknown(format!("insert into {table} returned no rows")))
    }

    /// Insert a batch of records, each attributed individually.
    pub async fn insert_many(&self, table: &str, records: Vec<Value>) -> CoreResult<Vec<Value>> {
        let scope = self.require_scope("insert")?;
        let rows = records
            .into_iter()
            .map(|r| attribute(r, &scope))
            .collect();

        self.store
            .insert(&scope.store_auth(), table, rows)
            .await
            .map_err(|raw| self.classify_and_notify(raw))
    }

    /// Read rows visible under the current identity and tenant.
    ///
    /// Deliberately no tenant filter here: the store's policy engine is
    /// the single authority on what this scope may see.
    pub async fn select(&self, table: &str, columns: &[&str]) -> CoreResult<Vec<Value>> {
        let scope = self.require_scope("select")?;
        self.store
            .select(&scope.store_auth(), table, columns, None)
            .await
            .map_err(|raw| self.classify_and_notify(raw))
    }

    /// Patch one row by id.
    pub async fn update(&self, table: &str, id: &str, patch: Value) -> CoreResult<Value> {
        let scope = self.require_scope("update")?;
        if id.trim().is_empty() {
            return Err(self.notify(CoreError::not_found_or_denied(format!(
                "update on {table} requires a row id"
            ))));
        }
        match self.store.update(&scope.store_auth(), table, id, patch).await {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(self.notify(CoreError::not_found_or_denied(format!(
                "row {id} in {table} is missing or not visible"
            )))),
            Err(raw) => Err(self.classify_and_notify(raw)),
        }
    }

    /// Delete one row by id.
    pub async fn delete(&self, table: &str, id: &str) -> CoreResult<()> {
        let scope = self.require_scope("delete")?;
        if id.trim().is_empty() {
            return Err(self.notify(CoreError::not_found_or_denied(format!(
                "delete on {table} requires a row id"
            ))));
        }
        self.store
            .delete(&scope.store_auth(), table, id)
            .await
            .map_err(|raw| self.classify_and_notify(raw))
    }

    /// Invoke a named server-side function.
    pub async fn rpc(&self, name: &str, params: Value) -> CoreResult<Value> {
        let scope = self.require_scope("rpc")?;
        self.store
            .rpc(&scope.store_auth(), name, params)
            .await
            .map_err(|raw| self.classify_and_notify(raw))
    }

    fn require_scope(&self, operation: &str) -> CoreResult<Scope> {
        match self.scope.read().clone() {
            Some(scope) => Ok(scope),
            None => {
                // Caller ordering bug: a context must be resolved and set
                // before any scoped operation runs.
                error!(operation, "scoped data operation before scope was configured");
                Err(self.notify(CoreError::scope_not_configured(format!(
                    "{operation} called before a tenant scope was configured"
                ))))
            }
        }
    }

    fn classify_and_notify(&self, raw: roost_core::StoreError) -> CoreError {
        self.notify(classify(&raw))
    }

    /// Broadcast a classified error to observers. Snapshot under the
    /// read lock, invoke outside it; observer results are discarded.
    fn notify(&self, err: CoreError) -> CoreError {
        let snapshot: Vec<ErrorObserver> = self
            .observers
            .read()
            .iter()
            .map(|e| e.observer.clone())
            .collect();
        for observer in snapshot {
            if let Err(observer_err) = observer(&err) {
                tracing::warn!(error = %observer_err, "error observer failed");
            }
        }
        err
    }
}

/// Fill in attribution fields from the scope, preserving whatever the
/// caller set explicitly.
fn attribute(mut record: Value, scope: &Scope) -> Value {
    if let Some(obj) = record.as_object_mut() {
        if !obj.contains_key("tenant_id") {
            obj.insert("tenant_id".to_string(), json!(scope.tenant_id.as_str()));
        }
        if !obj.contains_key("created_by") {
            obj.insert("created_by".to_string(), json!(scope.user_id.as_str()));
        }
    }
    record
}
