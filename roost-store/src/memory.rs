// In-memory row store for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use roost_core::StoreError;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::store::{RowStore, StoreAuth, StoreResult};

// Type aliases to reduce complexity
type Tables = HashMap<String, Vec<Value>>;
type RpcHandler = Arc<dyn Fn(&StoreAuth, Value) -> StoreResult<Value> + Send + Sync>;

const TENANTS: &str = "tenants";
const MEMBERSHIPS: &str = "memberships";
const PROFILES: &str = "profiles";

/// In-memory [`RowStore`] with its own row-level policy engine.
///
/// Visibility is driven by the `memberships` table: a tenant-owned row
/// is visible iff its `tenant_id` belongs to one of the authenticated
/// user's memberships. The engine can be switched off with
/// [`MemoryStore::set_policies_enforced`] - tests use that to prove the
/// scoped client adds no tenant filtering of its own.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    rpcs: RwLock<HashMap<String, RpcHandler>>,
    /// One-shot failure injection: "op:target" -> error to return.
    failures: RwLock<HashMap<String, StoreError>>,
    /// Log of executed operations, "op:target" per call.
    ops: RwLock<Vec<String>>,
    policies_enforced: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            rpcs: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            ops: RwLock::new(Vec::new()),
            policies_enforced: AtomicBool::new(true),
        }
    }

    /// Toggle the row-policy engine. With policies off every row is
    /// visible to every authenticated caller.
    pub fn set_policies_enforced(&self, enforced: bool) {
        self.policies_enforced.store(enforced, Ordering::SeqCst);
    }

    /// Register a server-side function callable via `rpc`.
    pub fn register_rpc(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&StoreAuth, Value) -> StoreResult<Value> + Send + Sync + 'static,
    ) {
        self.rpcs.write().insert(name.into(), Arc::new(handler));
    }

    /// Make the next matching operation fail with `error`. Keys are
    /// `"insert:table"`, `"select:table"`, `"update:table"`,
    /// `"delete:table"` or `"rpc:name"`; consumed on first hit.
    pub fn fail_next(&self, key: impl Into<String>, error: StoreError) {
        self.failures.write().insert(key.into(), error);
    }

    /// Seed rows directly, bypassing policy checks. Test setup only;
    /// does not show up in the operation log.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_string()).or_default();
        for mut row in rows {
            Self::stamp_row(&mut row);
            stored.push(row);
        }
    }

    /// Snapshot of a table's rows, ignoring visibility.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// How many logged operations start with `prefix`.
    pub fn op_count(&self, prefix: &str) -> usize {
        self.ops
            .read()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn log_op(&self, op: &str, target: &str) {
        self.ops.write().push(format!("{op}:{target}"));
    }

    fn take_failure(&self, key: &str) -> Option<StoreError> {
        self.failures.write().remove(key)
    }

    fn check_auth(&self, auth: &StoreAuth) -> StoreResult<()> {
        if auth.access_token.trim().is_empty() {
            return Err(StoreError::new("JWT expired").with_code("PGRST301"));
        }
        Ok(())
    }

    fn stamp_row(row: &mut Value) {
        if let Some(obj) = row.as_object_mut() {
            if !obj.contains_key("id") {
                obj.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
            }
            if !obj.contains_key("created_at") {
                obj.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
            }
        }
    }

    fn visible_tenants(tables: &Tables, auth: &StoreAuth) -> HashSet<String> {
        tables
            .get(MEMBERSHIPS)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r["user_id"] == json!(auth.user_id.as_str()))
                    .filter_map(|r| r["tenant_id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn row_visible(
        &self,
        table: &str,
        row: &Value,
        auth: &StoreAuth,
        visible: &HashSet<String>,
    ) -> bool {
        if !self.policies_enforced.load(Ordering::SeqCst) {
            return true;
        }
        match table {
            TENANTS => row["id"]
                .as_str()
                .map(|id| visible.contains(id))
                .unwrap_or(false),
            MEMBERSHIPS => {
                row["user_id"] == json!(auth.user_id.as_str())
                    || row["tenant_id"]
                        .as_str()
                        .map(|t| visible.contains(t))
                        .unwrap_or(false)
            }
            PROFILES => row["id"] == json!(auth.user_id.as_str()),
            _ => match row.get("tenant_id").and_then(Value::as_str) {
                Some(tenant) => visible.contains(tenant),
                // Rows without tenant attribution are unscoped.
                None => true,
            },
        }
    }

    fn insert_allowed(
        &self,
        table: &str,
        row: &Value,
        auth: &StoreAuth,
        visible: &HashSet<String>,
    ) -> bool {
        if !self.policies_enforced.load(Ordering::SeqCst) {
            return true;
        }
        match table {
            // Any authenticated user may provision a tenant.
            TENANTS => true,
            // Users may only write their own membership rows directly.
            MEMBERSHIPS => row["user_id"] == json!(auth.user_id.as_str()),
            PROFILES => row["id"] == json!(auth.user_id.as_str()),
            _ => match row.get("tenant_id").and_then(Value::as_str) {
                Some(tenant) => visible.contains(tenant),
                None => true,
            },
        }
    }

    fn delete_allowed(
        &self,
        table: &str,
        row: &Value,
        auth: &StoreAuth,
        visible: &HashSet<String>,
    ) -> bool {
        if !self.policies_enforced.load(Ordering::SeqCst) {
            return true;
        }
        match table {
            // A tenant row may be removed by a member, or by its creator
            // while the owning membership does not exist yet (onboarding
            // rollback).
            TENANTS => {
                row["id"]
                    .as_str()
                    .map(|id| visible.contains(id))
                    .unwrap_or(false)
                    || row["created_by"] == json!(auth.user_id.as_str())
            }
            _ => self.row_visible(table, row, auth, visible),
        }
    }

    fn project(row: &Value, columns: &[&str]) -> Value {
        if columns.is_empty() || columns.contains(&"*") {
            return row.clone();
        }
        let mut out = serde_json::Map::new();
        if let Some(obj) = row.as_object() {
            for col in columns {
                if let Some(v) = obj.get(*col) {
                    out.insert((*col).to_string(), v.clone());
                }
            }
        }
        Value::Object(out)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn insert(
        &self,
        auth: &StoreAuth,
        table: &str,
        rows: Vec<Value>,
    ) -> StoreResult<Vec<Value>> {
        self.log_op("insert", table);
        if let Some(err) = self.take_failure(&format!("insert:{table}")) {
            return Err(err);
        }
        self.check_auth(auth)?;

        let mut tables = self.tables.write();
        let visible = Self::visible_tenants(&tables, auth);

        // Validate the whole batch before storing any of it.
        for row in &rows {
            if !self.insert_allowed(table, row, auth, &visible) {
                return Err(StoreError::new(format!(
                    "new row violates row-level security policy for table \"{table}\""
                ))
                .with_code("42501"));
            }
            if table == MEMBERSHIPS {
                let duplicate = tables.get(MEMBERSHIPS).is_some_and(|existing| {
                    existing.iter().any(|r| {
                        r["tenant_id"] == row["tenant_id"] && r["user_id"] == row["user_id"]
                    })
                });
                if duplicate {
                    return Err(StoreError::new(
                        "duplicate key value violates unique constraint \"memberships_tenant_id_user_id_key\"",
                    )
                    .with_code("23505"));
                }
            }
        }

        let stored = tables.entry(table.to_string()).or_default();
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            Self::stamp_row(&mut row);
            stored.push(row.clone());
            out.push(row);
        }
        Ok(out)
    }

    async fn select(
        &self,
        auth: &StoreAuth,
        table: &str,
        columns: &[&str],
        eq: Option<(&str, &Value)>,
    ) -> StoreResult<Vec<Value>> {
        self.log_op("select", table);
        if let Some(err) = self.take_failure(&format!("select:{table}")) {
            return Err(err);
        }
        self.check_auth(auth)?;

        let tables = self.tables.read();
        let visible = Self::visible_tenants(&tables, auth);

        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| match eq {
                        Some((col, value)) => row.get(col) == Some(value),
                        None => true,
                    })
                    .filter(|row| self.row_visible(table, row, auth, &visible))
                    .map(|row| Self::project(row, columns))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        auth: &StoreAuth,
        table: &str,
        id: &str,
        patch: Value,
    ) -> StoreResult<Option<Value>> {
        self.log_op("update", table);
        if let Some(err) = self.take_failure(&format!("update:{table}")) {
            return Err(err);
        }
        self.check_auth(auth)?;

        let mut tables = self.tables.write();
        let visible = Self::visible_tenants(&tables, auth);

        let Some(rows) = tables.get_mut(table) else {
            return Ok(None);
        };
        for row in rows.iter_mut() {
            if row["id"] == json!(id) {
                // A row the caller may not see patches nothing - and the
                // caller cannot tell that apart from a missing row.
                if !self.row_visible(table, row, auth, &visible) {
                    return Ok(None);
                }
                if let (Some(obj), Some(patch_obj)) = (row.as_object_mut(), patch.as_object()) {
                    for (k, v) in patch_obj {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    async fn delete(&self, auth: &StoreAuth, table: &str, id: &str) -> StoreResult<()> {
        self.log_op("delete", table);
        if let Some(err) = self.take_failure(&format!("delete:{table}")) {
            return Err(err);
        }
        self.check_auth(auth)?;

        let mut tables = self.tables.write();
        let visible = Self::visible_tenants(&tables, auth);

        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| {
                row["id"] != json!(id) || !self.delete_allowed(table, row, auth, &visible)
            });
        }
        Ok(())
    }

    async fn rpc(&self, auth: &StoreAuth, name: &str, params: Value) -> StoreResult<Value> {
        self.log_op("rpc", name);
        if let Some(err) = self.take_failure(&format!("rpc:{name}")) {
            return Err(err);
        }
        self.check_auth(auth)?;

        let handler = self.rpcs.read().get(name).cloned();
        match handler {
            Some(handler) => handler(auth, params),
            None => Err(StoreError::new(format!("function {name} does not exist"))
                .with_code("42883")),
        }
    }
}
