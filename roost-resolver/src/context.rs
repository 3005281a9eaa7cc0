// The process-wide tenant context store.

use std::sync::Arc;

use parking_lot::RwLock;
use roost_core::{CoreError, CoreResult, TenantContext};
use roost_session::Session;
use roost_store::{Scope, ScopedClient};
use tracing::{debug, warn};

use crate::persist::ContextStorage;

/// Lifecycle of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    /// Nothing has happened yet.
    Uninitialized,
    /// A restore is in progress.
    Loading,
    /// No session.
    Anonymous,
    /// Signed in, but no tenant context is active.
    NoActiveTenant,
    /// Signed in with an active tenant context.
    Active,
}

impl ContextPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ContextPhase::Uninitialized => "uninitialized",
            ContextPhase::Loading => "loading",
            ContextPhase::Anonymous => "anonymous",
            ContextPhase::NoActiveTenant => "no_active_tenant",
            ContextPhase::Active => "active",
        }
    }
}

struct Inner {
    phase: ContextPhase,
    context: Option<TenantContext>,
}

/// Holds the active (user, tenant, role) snapshot for the process.
///
/// The single mutable shared resource of the system: all mutation goes
/// through [`ContextStore::set_context`] and [`ContextStore::clear`],
/// never field assignment from call sites, so the auth-change listener
/// and the resolver's completion cannot race each other into a lost
/// update. `set_context` reconfigures the scoped data client before it
/// returns - once a caller observes the context as set, every scoped
/// read already runs under it.
pub struct ContextStore {
    inner: RwLock<Inner>,
    storage: Arc<dyn ContextStorage>,
    client: Arc<ScopedClient>,
}

impl ContextStore {
    pub fn new(storage: Arc<dyn ContextStorage>, client: Arc<ScopedClient>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                phase: ContextPhase::Uninitialized,
                context: None,
            }),
            storage,
            client,
        }
    }

    pub fn phase(&self) -> ContextPhase {
        self.inner.read().phase
    }

    pub fn context(&self) -> Option<TenantContext> {
        self.inner.read().context.clone()
    }

    /// The scoped data client this store configures.
    pub fn client(&self) -> &Arc<ScopedClient> {
        &self.client
    }

    /// On session established (or process start): restore a previously
    /// persisted context if one exists and belongs to this identity.
    ///
    /// A persisted context for a *different* user is discarded, not
    /// adopted - a shared device must never leak one user's tenant
    /// scope into another's session.
    pub fn restore(&self, session: Option<&Session>) {
        self.inner.write().phase = ContextPhase::Loading;

        let Some(session) = session else {
            self.client.clear_scope();
            let mut inner = self.inner.write();
            inner.context = None;
            inner.phase = ContextPhase::Anonymous;
            return;
        };

        match self.load_persisted() {
            Some(ctx) if ctx.user_id == session.identity.id => {
                debug!(tenant_id = %ctx.tenant_id, "restored persisted tenant context");
                self.apply(&ctx, &session.access_token, false);
            }
            Some(ctx) => {
                warn!(
                    persisted_user = %ctx.user_id,
                    session_user = %session.identity.id,
                    "discarding persisted context for a different user"
                );
                if let Err(e) = self.storage.remove() {
                    warn!(error = %e, "failed to remove stale persisted context");
                }
                let mut inner = self.inner.write();
                inner.context = None;
                inner.phase = ContextPhase::NoActiveTenant;
            }
            None => {
                let mut inner = self.inner.write();
                inner.context = None;
                inner.phase = ContextPhase::NoActiveTenant;
            }
        }
    }

    /// Activate a context. Rejects a context with an empty user id:
    /// callers resolve it from the live identity, and no ambient source
    /// is ever trusted to fill it in later.
    pub fn set_context(&self, ctx: &TenantContext, credential: &str) -> CoreResult<()> {
        if ctx.user_id.is_empty() {
            return Err(CoreError::scope_not_configured(
                "context user id is empty; resolve it from the live identity",
            ));
        }
        self.apply(ctx, credential, true);
        Ok(())
    }

    /// Drop everything: data-client scope, in-memory context, persisted
    /// state. Idempotent; the sign-out path.
    pub fn clear(&self) {
        self.wipe(ContextPhase::Anonymous);
    }

    /// Like [`ContextStore::clear`], but the session is still live - a
    /// resolution error destroyed the context, not a sign-out.
    pub fn invalidate(&self) {
        self.wipe(ContextPhase::NoActiveTenant);
    }

    fn wipe(&self, phase: ContextPhase) {
        self.client.clear_scope();
        if let Err(e) = self.storage.remove() {
            warn!(error = %e, "failed to remove persisted context");
        }
        let mut inner = self.inner.write();
        inner.context = None;
        inner.phase = phase;
    }

    fn apply(&self, ctx: &TenantContext, credential: &str, persist: bool) {
        // Scope first: by the time anyone can observe the new context,
        // the data client already carries it.
        self.client.configure(Scope::new(
            ctx.tenant_id.clone(),
            ctx.user_id.clone(),
            credential,
        ));

        let unchanged = {
            let mut inner = self.inner.write();
            let unchanged = inner.context.as_ref() == Some(ctx);
            inner.context = Some(ctx.clone());
            inner.phase = ContextPhase::Active;
            unchanged
        };

        // Same value twice writes storage once.
        if persist && !unchanged {
            match serde_json::to_string(ctx) {
                Ok(raw) => {
                    if let Err(e) = self.storage.save(&raw) {
                        warn!(error = %e, "failed to persist tenant context");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize tenant context"),
            }
        }
    }

    fn load_persisted(&self) -> Option<TenantContext> {
        let raw = match self.storage.load() {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "failed to read persisted context");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                // Corrupt state is treated as absent, never as fatal.
                warn!(error = %e, "persisted context is unreadable, ignoring it");
                None
            }
        }
    }
}
