// The row-store boundary.

use async_trait::async_trait;
use roost_core::{StoreError, UserId};
use serde_json::Value;

/// Result type for raw store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The identity a store call runs under. Row policies evaluate against
/// this, not against anything the caller filters by.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreAuth {
    pub user_id: UserId,
    pub access_token: String,
}

impl StoreAuth {
    pub fn new(user_id: impl Into<UserId>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

/// Trait for the underlying record store.
///
/// Implementations enforce row-level visibility themselves; callers get
/// back only what the authenticated identity may see. Rows are JSON
/// objects keyed by an `"id"` field.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Insert rows and return them as stored.
    async fn insert(&self, auth: &StoreAuth, table: &str, rows: Vec<Value>)
        -> StoreResult<Vec<Value>>;

    /// Select rows visible under `auth`. `columns` of `["*"]` (or empty)
    /// selects whole rows; `eq` is an optional column equality filter.
    async fn select(
        &self,
        auth: &StoreAuth,
        table: &str,
        columns: &[&str],
        eq: Option<(&str, &Value)>,
    ) -> StoreResult<Vec<Value>>;

    /// Patch one row by id. Returns `None` when the row is missing or
    /// not visible - the store does not distinguish.
    async fn update(
        &self,
        auth: &StoreAuth,
        table: &str,
        id: &str,
        patch: Value,
    ) -> StoreResult<Option<Value>>;

    /// Delete one row by id. Deleting an invisible or missing row is a
    /// silent no-op, mirroring the visibility ambiguity of `update`.
    async fn delete(&self, auth: &StoreAuth, table: &str, id: &str) -> StoreResult<()>;

    /// Invoke a named server-side function.
    async fn rpc(&self, auth: &StoreAuth, name: &str, params: Value) -> StoreResult<Value>;
}
