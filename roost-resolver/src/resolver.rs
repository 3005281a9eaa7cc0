// The tenant resolution state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roost_core::{CoreError, MembershipView, TenantContext, TenantId};
use roost_session::{Identity, Session, SessionEvent, SessionProvider};
use roost_store::{MembershipRepository, StoreAuth};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::context::ContextStore;
use crate::options::{ResolveConcurrency, ResolverOptions};

/// Where a resolution attempt currently stands.
#[derive(Debug, Clone)]
pub enum ResolveState {
    /// No attempt has run (or the session ended).
    Idle,
    /// Verifying the session and querying memberships.
    Checking,
    /// Zero memberships: waiting for the organization form.
    Onboarding,
    /// Two or more memberships: waiting for the user's choice.
    Selecting,
    /// Exactly one membership: finishing without interaction.
    AutoSelecting,
    /// A context was resolved and stored.
    Done,
    /// The attempt failed; `retry()` re-enters from scratch.
    Failed {
        error: CoreError,
        /// Guidance for authorization denials - retrying without
        /// remediation will fail the same way.
        remediation: Option<String>,
    },
}

impl ResolveState {
    pub fn name(&self) -> &'static str {
        match self {
            ResolveState::Idle => "idle",
            ResolveState::Checking => "checking",
            ResolveState::Onboarding => "onboarding",
            ResolveState::Selecting => "selecting",
            ResolveState::AutoSelecting => "auto_selecting",
            ResolveState::Done => "done",
            ResolveState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolveState::Done | ResolveState::Failed { .. })
    }
}

/// Resolution errors.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Returned under [`ResolveConcurrency::Ignore`] when an attempt is
    /// already running.
    #[error("a resolution is already in flight")]
    AlreadyInFlight,
}

/// The organization form collected during onboarding.
#[derive(Debug, Clone)]
pub struct OrgSetup {
    pub name: String,
    /// Optional display name for the onboarding user.
    pub display_name: Option<String>,
}

impl OrgSetup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("organization name must not be empty".to_string());
        }
        Ok(())
    }
}

/// Continuation for the onboarding branch. Stamped with the resolution
/// generation: completing a ticket after the session moved on is a
/// no-op.
#[derive(Debug, Clone)]
pub struct OnboardingTicket {
    identity: Identity,
    generation: u64,
}

/// Continuation for the selection branch.
#[derive(Debug, Clone)]
pub struct SelectionTicket {
    identity: Identity,
    generation: u64,
    pub candidates: Vec<MembershipView>,
}

/// Outcome of a resolution step.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A context is active; resolution is done.
    Resolved(TenantContext),
    /// Zero memberships: run the organization form, then call
    /// [`TenantResolver::complete_onboarding`].
    NeedsOnboarding(OnboardingTicket),
    /// Several memberships: present `candidates`, then call
    /// [`TenantResolver::complete_selection`].
    NeedsSelection(SelectionTicket),
    /// The session changed while this step was in flight; nothing was
    /// changed anywhere.
    Superseded,
}

/// Handle for the background session-event listener.
pub struct SessionListenerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl SessionListenerHandle {
    /// Stop the listener and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join_handle.await;
    }
}

/// Determines exactly one active tenant context for the authenticated
/// identity.
///
/// `Checking -> {Onboarding | Selecting | AutoSelecting} -> Done`, with
/// `Failed` reachable from anywhere and `retry()` re-entering from
/// scratch. Attempts are serialized: the membership snapshot one attempt
/// classifies can never interleave with another attempt's writes.
pub struct TenantResolver {
    session: Arc<dyn SessionProvider>,
    memberships: Arc<dyn MembershipRepository>,
    context: Arc<ContextStore>,
    options: ResolverOptions,
    state: RwLock<ResolveState>,
    gate: Mutex<()>,
    /// Bumped on every session change; stale work no-ops against it.
    generation: AtomicU64,
}

impl TenantResolver {
    pub fn new(
        session: Arc<dyn SessionProvider>,
        memberships: Arc<dyn MembershipRepository>,
        context: Arc<ContextStore>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            session,
            memberships,
            context,
            options,
            state: RwLock::new(ResolveState::Idle),
            gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ResolveState {
        self.state.read().clone()
    }

    pub fn context_store(&self) -> &Arc<ContextStore> {
        &self.context
    }

    /// Entry operation: classify the identity's memberships and either
    /// finish directly or hand back a continuation ticket.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<Resolution, ResolveError> {
        let _guard = self.acquire().await?;
        self.resolve_locked().await
    }

    /// Manual retry transition: re-enters resolution from scratch.
    /// Re-running classifies a fresh snapshot and is idempotent.
    pub async fn retry(&self) -> Result<Resolution, ResolveError> {
        self.resolve().await
    }

    /// Finish onboarding: provision the organization and activate the
    /// owner context. If a concurrent attempt already created this
    /// user's membership, short-circuits to auto-selection instead of
    /// provisioning a second tenant.
    #[instrument(skip(self, setup), fields(org = %setup.name))]
    pub async fn complete_onboarding(
        &self,
        ticket: &OnboardingTicket,
        setup: &OrgSetup,
    ) -> Result<Resolution, ResolveError> {
        setup.validate().map_err(ResolveError::InvalidInput)?;
        let _guard = self.acquire().await?;

        let Some(session) = self.ticket_session(ticket.generation, &ticket.identity).await
        else {
            return Ok(Resolution::Superseded);
        };
        let auth = store_auth(&session);

        // A near-simultaneous resolution may have provisioned already;
        // detect its membership and adopt it.
        let existing = self
            .memberships
            .list_memberships(&auth, &session.identity.id)
            .await
            .map_err(|e| self.fail(e))?;
        if let Some(view) = existing.first() {
            info!(tenant_id = %view.tenant_id, "membership appeared mid-onboarding, auto-selecting");
            self.set_state(ResolveState::AutoSelecting);
            let ctx = self.context_for(&session.identity, view, setup.display_name.clone());
            return self.finish(ctx, &session, ticket.generation).await;
        }

        let (tenant, membership) = self
            .memberships
            .provision_tenant(
                &auth,
                setup.name.trim(),
                &session.identity.id,
                self.options.onboarding_role,
            )
            .await
            .map_err(|e| self.fail(e))?;

        info!(tenant_id = %tenant.id, "organization provisioned");
        let view = MembershipView {
            tenant_id: tenant.id,
            role: membership.role,
            tenant_name: tenant.name,
            tenant_plan: tenant.plan,
            tenant_status: tenant.status,
        };
        let ctx = self.context_for(&session.identity, &view, setup.display_name.clone());
        self.finish(ctx, &session, ticket.generation).await
    }

    /// Finish selection: record the chosen tenant as active and
    /// activate its context. Exactly one store mutation.
    #[instrument(skip(self, ticket), fields(tenant_id = %chosen))]
    pub async fn complete_selection(
        &self,
        ticket: &SelectionTicket,
        chosen: &TenantId,
    ) -> Result<Resolution, ResolveError> {
        let Some(view) = ticket.candidates.iter().find(|c| &c.tenant_id == chosen) else {
            return Err(ResolveError::InvalidInput(format!(
                "tenant {chosen} is not one of the presented candidates"
            )));
        };
        let _guard = self.acquire().await?;

        let Some(session) = self.ticket_session(ticket.generation, &ticket.identity).await
        else {
            return Ok(Resolution::Superseded);
        };
        let auth = store_auth(&session);

        self.memberships
            .set_active_tenant(&auth, &session.identity.id, chosen)
            .await
            .map_err(|e| self.fail(e))?;

        let ctx = self.context_for(&session.identity, view, None);
        self.finish(ctx, &session, ticket.generation).await
    }

    /// React to a session lifecycle event. Sign-out clears the context
    /// store and supersedes any in-flight resolution; a token refresh
    /// changes nothing (the identity is unchanged).
    pub async fn handle_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::SignedOut => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.context.clear();
                self.set_state(ResolveState::Idle);
            }
            SessionEvent::SignedIn { .. } => {
                // A new identity supersedes whatever the previous one
                // had in flight.
                self.generation.fetch_add(1, Ordering::SeqCst);
                let session = self.session.current().await;
                self.context.restore(session.as_ref());
                self.set_state(ResolveState::Idle);
            }
            SessionEvent::TokenRefreshed => {}
        }
    }

    /// Spawn a background task that feeds provider events into
    /// [`TenantResolver::handle_session_event`].
    pub fn spawn_session_listener(resolver: &Arc<Self>) -> SessionListenerHandle {
        let mut events = resolver.session.subscribe();
        let resolver = Arc::clone(resolver);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = events.next() => match event {
                        Some(event) => resolver.handle_session_event(&event).await,
                        None => break,
                    },
                }
            }
        });

        SessionListenerHandle {
            shutdown_tx,
            join_handle,
        }
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, ()>, ResolveError> {
        match self.options.concurrency {
            ResolveConcurrency::Queue => Ok(self.gate.lock().await),
            ResolveConcurrency::Ignore => self
                .gate
                .try_lock()
                .map_err(|_| ResolveError::AlreadyInFlight),
        }
    }

    async fn resolve_locked(&self) -> Result<Resolution, ResolveError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.set_state(ResolveState::Checking);

        // Session validity comes strictly first: the repository is never
        // queried unauthenticated.
        let session = self.require_session().await.map_err(|e| self.fail(e))?;
        let auth = store_auth(&session);

        let snapshot = self
            .memberships
            .list_memberships(&auth, &session.identity.id)
            .await
            .map_err(|e| self.fail(e))?;

        match snapshot.len() {
            0 => {
                debug!(user_id = %session.identity.id, "no memberships, onboarding");
                self.set_state(ResolveState::Onboarding);
                Ok(Resolution::NeedsOnboarding(OnboardingTicket {
                    identity: session.identity,
                    generation,
                }))
            }
            1 => {
                let view = &snapshot[0];
                debug!(tenant_id = %view.tenant_id, "single membership, auto-selecting");
                self.set_state(ResolveState::AutoSelecting);
                let ctx = self.context_for(&session.identity, view, None);
                self.finish(ctx, &session, generation).await
            }
            n => {
                debug!(candidates = n, "multiple memberships, selection required");
                self.set_state(ResolveState::Selecting);
                Ok(Resolution::NeedsSelection(SelectionTicket {
                    identity: session.identity,
                    generation,
                    candidates: snapshot,
                }))
            }
        }
    }

    async fn require_session(&self) -> Result<Session, CoreError> {
        let Some(session) = self.session.current().await else {
            return Err(CoreError::no_session("no session; sign in to continue"));
        };
        if !session.is_valid(chrono::Utc::now()) {
            return Err(CoreError::invalid_credential(
                "session credential is expired",
            ));
        }
        Ok(session)
    }

    /// Validate a ticket against the live session. `None` means the
    /// continuation is stale and must do nothing.
    async fn ticket_session(&self, generation: u64, identity: &Identity) -> Option<Session> {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("continuation superseded by a session change");
            return None;
        }
        let session = self.session.current().await?;
        if session.identity.id != identity.id {
            debug!("continuation identity no longer matches the session");
            return None;
        }
        Some(session)
    }

    fn context_for(
        &self,
        identity: &Identity,
        view: &MembershipView,
        display_name: Option<String>,
    ) -> TenantContext {
        // The user fields always come from the live identity - never
        // from stored state, never from the caller.
        TenantContext::from_membership(
            identity.id.clone(),
            identity.email.clone(),
            display_name.or_else(|| identity.full_name.clone()),
            view,
        )
    }

    /// Terminal success: persist the context, configure the data-client
    /// scope, report Done. A stale generation or changed identity turns
    /// this into a no-op.
    async fn finish(
        &self,
        ctx: TenantContext,
        session: &Session,
        generation: u64,
    ) -> Result<Resolution, ResolveError> {
        if self
            .ticket_session(generation, &session.identity)
            .await
            .is_none()
        {
            return Ok(Resolution::Superseded);
        }

        self.context
            .set_context(&ctx, &session.access_token)
            .map_err(|e| self.fail(e))?;

        info!(tenant_id = %ctx.tenant_id, role = %ctx.role, "tenant context resolved");
        self.set_state(ResolveState::Done);
        Ok(Resolution::Resolved(ctx))
    }

    /// Terminal failure: destroy any active context, record the cause
    /// (with remediation guidance for authorization denials) and leave
    /// the retry transition to the caller.
    fn fail(&self, err: CoreError) -> ResolveError {
        error!(kind = err.kind.name(), error = %err, "tenant resolution failed");

        if err.kind == roost_core::ErrorKind::NoSession {
            self.context.clear();
        } else {
            self.context.invalidate();
        }

        let remediation = (err.kind == roost_core::ErrorKind::PermissionDenied)
            .then(|| self.options.denial_remediation.clone());
        self.set_state(ResolveState::Failed {
            error: err.clone(),
            remediation,
        });
        ResolveError::Core(err)
    }

    fn set_state(&self, state: ResolveState) {
        debug!(state = state.name(), "resolver state");
        *self.state.write() = state;
    }
}

fn store_auth(session: &Session) -> StoreAuth {
    StoreAuth::new(session.identity.id.clone(), session.access_token.clone())
}
