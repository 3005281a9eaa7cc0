//! roost-resolver: tenant resolution and the active context store.
//!
//! Given an authenticated session, the resolver determines exactly one
//! active tenant context: it provisions a tenant for first-time users,
//! auto-selects for users with a single membership, and asks for a
//! choice otherwise. The resolved context lives in a process-wide
//! [`ContextStore`] that persists across restarts and configures the
//! scoped data client before anyone can read under a stale scope.

pub mod context;
pub mod options;
pub mod persist;
pub mod resolver;

pub use context::{ContextPhase, ContextStore};
pub use options::{ResolveConcurrency, ResolverOptions};
pub use persist::{ContextStorage, FileStorage, MemoryStorage};
pub use resolver::{
    OnboardingTicket, OrgSetup, Resolution, ResolveError, ResolveState, SelectionTicket,
    SessionListenerHandle, TenantResolver,
};
